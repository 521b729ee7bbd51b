#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;

use tide_core::concurrency::TideConcurrencyManager;
use tide_core::events::{CodeReference, CodeRepository, LogHandle, TideEvent};
use tide_core::flow::Flow;
use tide_core::memory::{InMemoryEventStore, InMemoryLogStream, InMemoryTideTimeline};
use tide_core::ports::{
    Clock, CommentSink, DelayedCommandScheduler, EventPublisher, StatusSink, TaskExecutor,
    TideRepository,
};
use tide_core::status::{DeploymentCommentListener, Status, TideStatusListener};
use tide_core::task::ExecutorCommand;
use tide_core::{Tide, TideCommand, TideEngine, TideRequest};

#[derive(Default)]
pub struct RecordingPublisher {
    pub queue: Mutex<VecDeque<TideEvent>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, events: Vec<TideEvent>) -> anyhow::Result<()> {
        self.queue.lock().await.extend(events);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingScheduler {
    pub scheduled: Mutex<Vec<(TideCommand, Duration)>>,
}

#[async_trait]
impl DelayedCommandScheduler for RecordingScheduler {
    async fn schedule(&self, command: TideCommand, delay: Duration) -> anyhow::Result<()> {
        self.scheduled.lock().await.push((command, delay));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingExecutor {
    pub commands: Mutex<Vec<ExecutorCommand>>,
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn dispatch(&self, command: ExecutorCommand) -> anyhow::Result<()> {
        self.commands.lock().await.push(command);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingStatusSink {
    pub statuses: Mutex<Vec<Status>>,
    pub failing: bool,
}

#[async_trait]
impl StatusSink for RecordingStatusSink {
    async fn update(&self, _tide: &Tide, status: &Status) -> anyhow::Result<()> {
        if self.failing {
            anyhow::bail!("GitHub API error: 502");
        }
        self.statuses.lock().await.push(status.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCommentSink {
    pub comments: Mutex<Vec<(u64, String)>>,
}

#[async_trait]
impl CommentSink for RecordingCommentSink {
    async fn comment(&self, _tide: &Tide, pull_request: u64, body: &str) -> anyhow::Result<()> {
        self.comments
            .lock()
            .await
            .push((pull_request, body.to_string()));
        Ok(())
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub struct StaticConcurrency(pub bool);

#[async_trait]
impl TideConcurrencyManager for StaticConcurrency {
    async fn should_tide_start(&self, _tide: &Tide) -> anyhow::Result<bool> {
        Ok(self.0)
    }
}

/// Engine wired to in-memory storage and recording collaborators. Published
/// events are fed back through the engine and the listeners by [`Harness::pump`].
pub struct Harness {
    pub engine: TideEngine,
    pub store: Arc<InMemoryEventStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub scheduler: Arc<RecordingScheduler>,
    pub executor: Arc<RecordingExecutor>,
    pub statuses: Arc<RecordingStatusSink>,
    pub comments: Arc<RecordingCommentSink>,
    pub logs: Arc<InMemoryLogStream>,
    pub timeline: Arc<InMemoryTideTimeline>,
    pub status_listener: TideStatusListener,
    pub comment_listener: DeploymentCommentListener,
    pub processed: Vec<TideEvent>,
    pub started_at: DateTime<Utc>,
}

impl Harness {
    pub fn new(allow_start: bool) -> Self {
        Self::with_status_sink(allow_start, RecordingStatusSink::default())
    }

    pub fn with_status_sink(allow_start: bool, statuses: RecordingStatusSink) -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let executor = Arc::new(RecordingExecutor::default());
        let statuses = Arc::new(statuses);
        let comments = Arc::new(RecordingCommentSink::default());
        let logs = Arc::new(InMemoryLogStream::new());
        let timeline = Arc::new(InMemoryTideTimeline::new());

        let started_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(FixedClock(started_at + chrono::Duration::seconds(125)));
        let tides = TideRepository::new(store.clone());

        let engine = TideEngine::new(
            store.clone(),
            publisher.clone(),
            scheduler.clone(),
            executor.clone(),
            Arc::new(StaticConcurrency(allow_start)),
        );
        let status_listener = TideStatusListener::new(
            tides.clone(),
            statuses.clone(),
            logs.clone(),
            timeline.clone(),
            clock,
        );
        let comment_listener = DeploymentCommentListener::new(tides, comments.clone(), logs.clone());

        Self {
            engine,
            store,
            publisher,
            scheduler,
            executor,
            statuses,
            comments,
            logs,
            timeline,
            status_listener,
            comment_listener,
            processed: Vec::new(),
            started_at,
        }
    }

    /// Inject an event as if an executor reported it, then pump.
    pub async fn report(&mut self, event: TideEvent) {
        self.publisher.queue.lock().await.push_back(event);
        self.pump().await;
    }

    /// Process published events until the bus is empty.
    pub async fn pump(&mut self) {
        loop {
            let next = self.publisher.queue.lock().await.pop_front();
            let Some(event) = next else {
                break;
            };

            self.engine.process_event(event.clone()).await.unwrap();
            self.timeline.observe(&event, self.started_at).await;
            self.status_listener.notify(&event).await;
            self.comment_listener.notify(&event).await;
            self.processed.push(event);
        }
    }

    pub async fn commands(&self) -> Vec<ExecutorCommand> {
        self.executor.commands.lock().await.clone()
    }

    pub async fn statuses(&self) -> Vec<Status> {
        self.statuses.statuses.lock().await.clone()
    }
}

pub fn flow() -> Flow {
    serde_json::from_value(serde_json::json!({
        "uuid": "6f0c6b8e-2b1a-4c55-9b0e-0a1f3f1f2a10",
        "repository": { "full_name": "acme/shop" },
        "user": { "username": "sam" },
        "tasks": [
            {
                "id": "images",
                "type": "build",
                "services": [
                    { "service": "web", "image": "acme/web", "tag": "abc123" },
                    { "service": "api", "image": "acme/api", "tag": "abc123", "dockerfile": "api/Dockerfile" }
                ]
            },
            {
                "id": "deployment",
                "type": "deploy",
                "cluster": "staging",
                "services": ["web", "api"]
            },
            {
                "id": "smoke",
                "type": "run",
                "cluster": "staging",
                "image": "acme/smoke-tests",
                "commands": ["curl -f http://${SERVICE_API_PUBLIC_ENDPOINT}/health"],
                "environment_variables": [
                    { "name": "BASE_URL", "value": "http://${SERVICE_WEB_PUBLIC_ENDPOINT}/" },
                    { "name": "ON_MAIN", "condition": "code_reference.branch == 'main'", "value": "yes" }
                ]
            }
        ]
    }))
    .unwrap()
}

pub fn push_to_main(pull_request: Option<u64>) -> TideRequest {
    let code_reference = CodeReference {
        repository: CodeRepository::new("acme/shop"),
        branch: "main".to_string(),
        sha: "abc123".to_string(),
        pull_request,
    };
    TideRequest::new(&flow(), code_reference, LogHandle::new("flows/shop")).unwrap()
}
