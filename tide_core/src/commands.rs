//! Commands accepted by the engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{CodeReference, FlowReference, LogHandle, TideEvent};
use crate::flow::{Flow, FlowError, TideConfiguration};

/// Everything needed to create and start one tide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TideRequest {
    pub tide_uuid: Uuid,
    pub flow: FlowReference,
    pub code_reference: CodeReference,
    pub parent_log: LogHandle,
    pub configuration: TideConfiguration,
}

impl TideRequest {
    /// A request for a new tide of `flow` on `code_reference`.
    pub fn new(
        flow: &Flow,
        code_reference: CodeReference,
        parent_log: LogHandle,
    ) -> Result<Self, FlowError> {
        let configuration = flow.tide_configuration(&code_reference)?;
        Ok(Self {
            tide_uuid: Uuid::new_v4(),
            flow: flow.reference(),
            code_reference,
            parent_log,
            configuration,
        })
    }

    pub fn created_event(&self) -> TideEvent {
        TideEvent::TideCreated {
            tide_uuid: self.tide_uuid,
            flow: self.flow.clone(),
            code_reference: self.code_reference.clone(),
            parent_log: self.parent_log.clone(),
            configuration: self.configuration.clone(),
        }
    }

    pub fn started_event(&self) -> TideEvent {
        TideEvent::TideStarted {
            tide_uuid: self.tide_uuid,
            flow: self.flow.clone(),
            code_reference: self.code_reference.clone(),
            parent_log: self.parent_log.clone(),
            configuration: self.configuration.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TideCommand {
    /// Record a new tide and try to start it.
    CreateTide(TideRequest),
    /// Start a created tide once the flow's concurrency allows it.
    StartTide(TideRequest),
}

impl TideCommand {
    pub fn request(&self) -> &TideRequest {
        match self {
            Self::CreateTide(request) | Self::StartTide(request) => request,
        }
    }

    pub fn tide_uuid(&self) -> Uuid {
        self.request().tide_uuid
    }
}
