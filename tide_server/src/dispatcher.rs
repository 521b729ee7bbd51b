//! Routes bus messages to the engine, then to the projections and listeners.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use uuid::Uuid;

use tide_core::events::LogHandle;
use tide_core::flow::Flow;
use tide_core::memory::{InMemoryConcurrencyRecords, InMemoryTideTimeline};
use tide_core::ports::Clock;
use tide_core::status::{DeploymentCommentListener, TideStatusListener};
use tide_core::{StartOutcome, TideCommand, TideEngine, TideRequest};

use crate::bus::Message;
use crate::metrics;

pub struct Dispatcher {
    pub engine: TideEngine,
    pub flows: HashMap<Uuid, Flow>,
    pub concurrency: Arc<InMemoryConcurrencyRecords>,
    pub timeline: Arc<InMemoryTideTimeline>,
    pub clock: Arc<dyn Clock>,
    pub status: TideStatusListener,
    pub comments: DeploymentCommentListener,
}

impl Dispatcher {
    /// Handle one message. Failures are logged and the message is dropped.
    pub async fn handle(&self, message: Message) {
        let kind = message.kind();
        metrics::message_received(kind);

        if let Err(e) = self.try_handle(message).await {
            tracing::error!(kind, "Message failed: {e:#}");
            metrics::message_failed(kind);
        }
    }

    async fn try_handle(&self, message: Message) -> anyhow::Result<()> {
        match message {
            Message::Trigger {
                flow_uuid,
                code_reference,
            } => {
                let flow = self
                    .flows
                    .get(&flow_uuid)
                    .with_context(|| format!("flow {flow_uuid} is not registered"))?;
                let request = TideRequest::new(
                    flow,
                    code_reference,
                    LogHandle::new(format!("flows/{flow_uuid}")),
                )?;
                self.handle_command(TideCommand::CreateTide(request)).await
            }
            Message::Command(command) => self.handle_command(command).await,
            Message::Event(event) => {
                self.engine.process_event(event.clone()).await?;

                self.concurrency.observe(&event).await;
                self.timeline.observe(&event, self.clock.now()).await;
                self.status.notify(&event).await;
                self.comments.notify(&event).await;
                Ok(())
            }
        }
    }

    async fn handle_command(&self, command: TideCommand) -> anyhow::Result<()> {
        let tide_uuid = command.tide_uuid();
        let started = command.request().started_event();
        let outcome = self.engine.handle_command(command).await?;

        // The slot is taken now, not when `TideStarted` comes back off the bus.
        if outcome == StartOutcome::Started {
            self.concurrency.observe(&started).await;
        }

        tracing::info!(tide_uuid = %tide_uuid, outcome = ?outcome, "Command handled");
        Ok(())
    }
}
