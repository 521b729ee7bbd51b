//! Status projection: mirrors tide outcomes to the source-control provider.
//!
//! Listeners are best-effort: every failure is written to the tide's log
//! stream and to `tracing`, then dropped. Nothing here can fail the event
//! that triggered it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::{Deployment, TideEvent};
use crate::ports::{Clock, CommentSink, LogStream, StatusSink, TideRepository, TideTimeline};
use crate::tide::Tide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Pending,
    Success,
    Failure,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub state: State,
    pub description: String,
}

impl Status {
    pub fn new(state: State, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
        }
    }
}

/// `"<mm>m <ss>s"`. Negative durations count as zero.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{:02}m {:02}s", seconds / 60, seconds % 60)
}

pub struct TideStatusListener {
    tides: TideRepository,
    sink: Arc<dyn StatusSink>,
    logs: Arc<dyn LogStream>,
    timeline: Arc<dyn TideTimeline>,
    clock: Arc<dyn Clock>,
}

impl TideStatusListener {
    pub fn new(
        tides: TideRepository,
        sink: Arc<dyn StatusSink>,
        logs: Arc<dyn LogStream>,
        timeline: Arc<dyn TideTimeline>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tides,
            sink,
            logs,
            timeline,
            clock,
        }
    }

    pub async fn notify(&self, event: &TideEvent) {
        if !matches!(
            event,
            TideEvent::TideCreated { .. }
                | TideEvent::TideSuccessful { .. }
                | TideEvent::TideFailed { .. }
        ) {
            return;
        }

        let tide = match self.tides.find(event.tide_uuid()).await {
            Ok(tide) => tide,
            Err(e) => {
                tracing::warn!(tide_uuid = %event.tide_uuid(), "Unable to load tide for status: {e}");
                crate::metrics::notification_failed("status");
                return;
            }
        };

        let result = match self.status_for(event).await {
            Ok(Some(status)) => self.sink.update(&tide, &status).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            report_failure(self.logs.as_ref(), &tide, "status", &e).await;
        }
    }

    async fn status_for(&self, event: &TideEvent) -> anyhow::Result<Option<Status>> {
        let status = match event {
            TideEvent::TideCreated { .. } => Status::new(State::Pending, "Running"),
            TideEvent::TideSuccessful { tide_uuid } => {
                let duration = match self.timeline.start_date(*tide_uuid).await? {
                    Some(started_at) => {
                        let seconds = (self.clock.now() - started_at).num_seconds();
                        crate::metrics::tide_duration(seconds.max(0) as u64);
                        format_duration(seconds)
                    }
                    None => "0".to_string(),
                };
                Status::new(State::Success, format!("Successfully ran in {duration}"))
            }
            TideEvent::TideFailed { reason, .. } => Status::new(State::Failure, reason.clone()),
            _ => return Ok(None),
        };

        Ok(Some(status))
    }
}

/// Comments the public endpoints of a deployment on the tide's pull request.
pub struct DeploymentCommentListener {
    tides: TideRepository,
    sink: Arc<dyn CommentSink>,
    logs: Arc<dyn LogStream>,
}

impl DeploymentCommentListener {
    pub fn new(tides: TideRepository, sink: Arc<dyn CommentSink>, logs: Arc<dyn LogStream>) -> Self {
        Self { tides, sink, logs }
    }

    pub async fn notify(&self, event: &TideEvent) {
        let TideEvent::DeploymentSuccessful {
            tide_uuid,
            deployment,
        } = event
        else {
            return;
        };
        if deployment.public_endpoints.is_empty() {
            return;
        }

        let tide = match self.tides.find(*tide_uuid).await {
            Ok(tide) => tide,
            Err(e) => {
                tracing::warn!(tide_uuid = %tide_uuid, "Unable to load tide for comment: {e}");
                crate::metrics::notification_failed("comment");
                return;
            }
        };
        let Some(pull_request) = tide.code_reference().pull_request else {
            return;
        };

        let body = deployment_comment(deployment);
        if let Err(e) = self.sink.comment(&tide, pull_request, &body).await {
            report_failure(self.logs.as_ref(), &tide, "comment", &e).await;
        }
    }
}

fn deployment_comment(deployment: &Deployment) -> String {
    let mut body = format!(
        "Deployed to environment `{}`:\n\n",
        deployment.environment
    );
    for endpoint in &deployment.public_endpoints {
        body.push_str(&format!("- **{}**: {}\n", endpoint.name, endpoint.address));
    }
    body
}

async fn report_failure(logs: &dyn LogStream, tide: &Tide, channel: &str, error: &anyhow::Error) {
    tracing::warn!(
        tide_uuid = %tide.uuid(),
        channel,
        "Notification failed: {error:#}"
    );
    crate::metrics::notification_failed(channel);

    let message = format!("Unable to update the {channel}: {error}");
    if let Err(e) = logs.write(tide.parent_log(), &message).await {
        tracing::warn!(tide_uuid = %tide.uuid(), "Unable to write to the tide log: {e}");
    }
}
