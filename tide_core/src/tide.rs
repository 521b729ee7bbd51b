//! Tide aggregate: the event-sourced root of one pipeline run.
//!
//! A tide's state is never stored: it is rebuilt by replaying the tide's
//! events through [`Tide::apply`]. Applying an event may derive new events
//! (e.g. `ImagesBuilt` once every build succeeded); those are returned and
//! staged until [`Tide::pop_new_events`] hands them to the publisher.

use std::collections::HashSet;

use uuid::Uuid;

use crate::events::{CodeReference, CodeRepository, FlowReference, LogHandle, TideEvent, User};
use crate::flow::TideConfiguration;

#[derive(Debug, thiserror::Error)]
pub enum TideError {
    /// A build reported success although no build was ever started.
    #[error("no started build found for tide {tide_uuid}")]
    BuildNotFound { tide_uuid: Uuid },
    #[error("tide history must open with TideCreated or TideStarted")]
    NotStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TideStatus {
    Pending,
    Running,
    Success,
    Failure,
}

impl TideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tide {
    uuid: Uuid,
    flow: FlowReference,
    code_reference: CodeReference,
    parent_log: LogHandle,
    configuration: TideConfiguration,
    events: Vec<TideEvent>,
    new_events: Vec<TideEvent>,
}

impl Tide {
    /// Start a new tide. The `TideStarted` event is applied and staged.
    pub fn create(
        uuid: Uuid,
        flow: FlowReference,
        code_reference: CodeReference,
        parent_log: LogHandle,
        configuration: TideConfiguration,
    ) -> Result<Self, TideError> {
        let started = TideEvent::TideStarted {
            tide_uuid: uuid,
            flow: flow.clone(),
            code_reference: code_reference.clone(),
            parent_log: parent_log.clone(),
            configuration: configuration.clone(),
        };

        let mut tide = Self {
            uuid,
            flow,
            code_reference,
            parent_log,
            configuration,
            events: Vec::new(),
            new_events: Vec::new(),
        };
        tide.new_events.push(started.clone());
        tide.apply(started)?;
        Ok(tide)
    }

    /// Rebuild a tide from its history. Events derived during the replay were
    /// already published when first computed and are discarded.
    pub fn from_events(events: impl IntoIterator<Item = TideEvent>) -> Result<Self, TideError> {
        let mut events = events.into_iter();
        let mut tide = match events.next() {
            Some(first) => Self::opened_by(first)?,
            None => return Err(TideError::NotStarted),
        };

        for event in events {
            tide.apply(event)?;
        }

        tide.pop_new_events();
        Ok(tide)
    }

    fn opened_by(event: TideEvent) -> Result<Self, TideError> {
        let (uuid, flow, code_reference, parent_log, configuration) = match &event {
            TideEvent::TideCreated {
                tide_uuid,
                flow,
                code_reference,
                parent_log,
                configuration,
            }
            | TideEvent::TideStarted {
                tide_uuid,
                flow,
                code_reference,
                parent_log,
                configuration,
            } => (
                *tide_uuid,
                flow.clone(),
                code_reference.clone(),
                parent_log.clone(),
                configuration.clone(),
            ),
            _ => return Err(TideError::NotStarted),
        };

        Ok(Self {
            uuid,
            flow,
            code_reference,
            parent_log,
            configuration,
            events: vec![event],
            new_events: Vec::new(),
        })
    }

    /// Apply an event, returning the events it derived (also staged).
    pub fn apply(&mut self, event: TideEvent) -> Result<Vec<TideEvent>, TideError> {
        let derived = match &event {
            TideEvent::TideCreated {
                flow,
                code_reference,
                parent_log,
                configuration,
                ..
            }
            | TideEvent::TideStarted {
                flow,
                code_reference,
                parent_log,
                configuration,
                ..
            } => {
                self.flow = flow.clone();
                self.code_reference = code_reference.clone();
                self.parent_log = parent_log.clone();
                self.configuration = configuration.clone();
                Vec::new()
            }
            TideEvent::BuildSuccessful { build_uuid, .. } => self.apply_build_successful(build_uuid)?,
            TideEvent::BuildFailed { reason, .. } => vec![TideEvent::TideFailed {
                tide_uuid: self.uuid,
                reason: format!("Build failed: {reason}"),
            }],
            TideEvent::TaskQueued { .. }
            | TideEvent::ImageBuildsStarted { .. }
            | TideEvent::BuildStarted { .. }
            | TideEvent::ImagesBuilt { .. }
            | TideEvent::DeploymentStarted { .. }
            | TideEvent::DeploymentSuccessful { .. }
            | TideEvent::DeploymentFailed { .. }
            | TideEvent::RunStarted { .. }
            | TideEvent::RunSuccessful { .. }
            | TideEvent::RunFailed { .. }
            | TideEvent::TideSuccessful { .. }
            | TideEvent::TideFailed { .. } => Vec::new(),
        };

        self.events.push(event);
        self.new_events.extend(derived.iter().cloned());

        Ok(derived)
    }

    /// Hand over the staged events. A second call returns nothing.
    pub fn pop_new_events(&mut self) -> Vec<TideEvent> {
        std::mem::take(&mut self.new_events)
    }

    /// `ImagesBuilt` once the distinct successful builds match the number of
    /// requested builds. Only the event completing the count derives it.
    fn apply_build_successful(&self, build_uuid: &Uuid) -> Result<Vec<TideEvent>, TideError> {
        let requested = self
            .events
            .iter()
            .find_map(|e| match e {
                TideEvent::ImageBuildsStarted { build_requests, .. } => Some(build_requests.len()),
                _ => None,
            })
            .ok_or(TideError::BuildNotFound {
                tide_uuid: self.uuid,
            })?;

        let mut successful: HashSet<&Uuid> = self
            .events
            .iter()
            .filter_map(|e| match e {
                TideEvent::BuildSuccessful { build_uuid, .. } => Some(build_uuid),
                _ => None,
            })
            .collect();

        if !successful.insert(build_uuid) {
            tracing::debug!(
                tide_uuid = %self.uuid,
                build_uuid = %build_uuid,
                "Duplicate build success ignored"
            );
            return Ok(Vec::new());
        }

        if successful.len() == requested {
            Ok(vec![TideEvent::ImagesBuilt {
                tide_uuid: self.uuid,
            }])
        } else {
            Ok(Vec::new())
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn flow(&self) -> &FlowReference {
        &self.flow
    }

    pub fn code_repository(&self) -> &CodeRepository {
        &self.flow.repository
    }

    pub fn code_reference(&self) -> &CodeReference {
        &self.code_reference
    }

    pub fn user(&self) -> &User {
        &self.flow.user
    }

    pub fn parent_log(&self) -> &LogHandle {
        &self.parent_log
    }

    pub fn configuration(&self) -> &TideConfiguration {
        &self.configuration
    }

    pub fn events(&self) -> &[TideEvent] {
        &self.events
    }

    pub fn is_started(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TideEvent::TideStarted { .. }))
    }

    pub fn is_finished(&self) -> bool {
        self.events.iter().any(TideEvent::is_terminal)
    }

    /// The first terminal event decides the outcome.
    pub fn status(&self) -> TideStatus {
        match self.events.iter().find(|e| e.is_terminal()) {
            Some(TideEvent::TideSuccessful { .. }) => TideStatus::Success,
            Some(_) => TideStatus::Failure,
            None if self.is_started() => TideStatus::Running,
            None => TideStatus::Pending,
        }
    }
}
