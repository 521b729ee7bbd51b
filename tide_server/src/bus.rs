//! In-process message bus: one channel carrying commands and events.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use tide_core::events::{CodeReference, LogHandle, TideEvent};
use tide_core::ports::{DelayedCommandScheduler, EventPublisher, LogStream, TaskExecutor};
use tide_core::task::ExecutorCommand;
use tide_core::TideCommand;

/// One line of the bus, e.g. `{"event": {"type": "BuildSuccessful", ...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    Command(TideCommand),
    Event(TideEvent),
    /// A push on a registered flow; becomes a `CreateTide` command.
    Trigger {
        flow_uuid: Uuid,
        code_reference: CodeReference,
    },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Command(TideCommand::CreateTide(_)) => "create_tide",
            Self::Command(TideCommand::StartTide(_)) => "start_tide",
            Self::Event(event) => event.kind(),
            Self::Trigger { .. } => "trigger",
        }
    }
}

#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, events: Vec<TideEvent>) -> anyhow::Result<()> {
        for event in events {
            self.tx
                .send(Message::Event(event))
                .map_err(|_| anyhow::anyhow!("message bus closed"))?;
        }
        Ok(())
    }
}

/// Re-enqueues commands from a detached timer task.
pub struct TimerScheduler {
    tx: mpsc::UnboundedSender<Message>,
}

impl TimerScheduler {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl DelayedCommandScheduler for TimerScheduler {
    async fn schedule(&self, command: TideCommand, delay: Duration) -> anyhow::Result<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let tide_uuid = command.tide_uuid();
            if tx.send(Message::Command(command)).is_err() {
                tracing::warn!(tide_uuid = %tide_uuid, "Bus closed before delayed command was sent");
            }
        });
        Ok(())
    }
}

/// Prints executor commands as JSON lines for the external builders,
/// deployers and runners.
pub struct StdoutExecutor;

#[async_trait]
impl TaskExecutor for StdoutExecutor {
    async fn dispatch(&self, command: ExecutorCommand) -> anyhow::Result<()> {
        let line = serde_json::to_string(&serde_json::json!({ "dispatch": command }))?;
        tracing::info!(
            tide_uuid = %command.tide_uuid(),
            command = command.kind(),
            "Dispatching executor command"
        );
        println!("{line}");
        Ok(())
    }
}

pub struct TracingLogStream;

#[async_trait]
impl LogStream for TracingLogStream {
    async fn write(&self, log: &LogHandle, message: &str) -> anyhow::Result<()> {
        tracing::info!(log = %log, "{message}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_message_shape() {
        let tide_uuid = Uuid::new_v4();
        let line = format!(r#"{{"event": {{"type": "ImagesBuilt", "tide_uuid": "{tide_uuid}"}}}}"#);

        let message: Message = serde_json::from_str(&line).unwrap();

        assert_eq!(message.kind(), "images_built");
        assert!(matches!(message, Message::Event(TideEvent::ImagesBuilt { .. })));
    }

    #[test]
    fn test_trigger_message_shape() {
        let line = r#"{"trigger": {
            "flow_uuid": "6f0c6b8e-2b1a-4c55-9b0e-0a1f3f1f2a10",
            "code_reference": {
                "repository": {"full_name": "acme/shop"},
                "branch": "main",
                "sha": "abc123"
            }
        }}"#;

        let message: Message = serde_json::from_str(line).unwrap();

        match message {
            Message::Trigger { code_reference, .. } => {
                assert_eq!(code_reference.sha, "abc123");
                assert_eq!(code_reference.pull_request, None);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publisher_sends_events_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let publisher = ChannelPublisher::new(tx);
        let tide_uuid = Uuid::new_v4();

        publisher
            .publish(vec![
                TideEvent::ImagesBuilt { tide_uuid },
                TideEvent::TideSuccessful { tide_uuid },
            ])
            .await
            .unwrap();

        assert_eq!(rx.recv().await.map(|m| m.kind()), Some("images_built"));
        assert_eq!(rx.recv().await.map(|m| m.kind()), Some("tide_successful"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_sends_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TimerScheduler::new(tx);
        let request = serde_json::from_value(serde_json::json!({
            "tide_uuid": Uuid::new_v4(),
            "flow": {
                "uuid": Uuid::new_v4(),
                "repository": {"full_name": "acme/shop"},
                "user": {"username": "sam"}
            },
            "code_reference": {
                "repository": {"full_name": "acme/shop"},
                "branch": "main",
                "sha": "abc123"
            },
            "parent_log": "flows/shop",
            "configuration": {"tasks": []}
        }))
        .unwrap();

        scheduler
            .schedule(TideCommand::StartTide(request), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await.map(|m| m.kind()), Some("start_tide"));
    }
}
