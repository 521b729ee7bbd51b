//! Interfaces of the collaborators the core calls into.
//!
//! Storage, transport, executors and notification channels all live outside
//! the core; the engine only sees these traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::commands::TideCommand;
use crate::concurrency::ConcurrencyRecord;
use crate::events::{LogHandle, TideEvent};
use crate::status::Status;
use crate::task::ExecutorCommand;
use crate::tide::{Tide, TideError};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("tide {0} not found")]
    TideNotFound(Uuid),
    #[error("tide {tide_uuid} cannot be rebuilt: {source}")]
    Corrupted {
        tide_uuid: Uuid,
        #[source]
        source: TideError,
    },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Hands events to the message bus. Delivery is at-least-once.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, events: Vec<TideEvent>) -> anyhow::Result<()>;
}

/// Append-only log of every tide's events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// The tide's events in append order.
    async fn find(&self, tide_uuid: Uuid) -> Result<Vec<TideEvent>, RepositoryError>;

    async fn append(&self, event: TideEvent) -> Result<(), RepositoryError>;
}

/// Re-enqueues a command after a delay.
#[async_trait]
pub trait DelayedCommandScheduler: Send + Sync {
    async fn schedule(&self, command: TideCommand, delay: Duration) -> anyhow::Result<()>;
}

/// Builder, deployer and runner backends. They report back with events.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn dispatch(&self, command: ExecutorCommand) -> anyhow::Result<()>;
}

/// Commit status on the source-control provider.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn update(&self, tide: &Tide, status: &Status) -> anyhow::Result<()>;
}

/// Pull-request comments on the source-control provider.
#[async_trait]
pub trait CommentSink: Send + Sync {
    async fn comment(&self, tide: &Tide, pull_request: u64, body: &str) -> anyhow::Result<()>;
}

/// The user-facing log streams tides and tasks write to.
#[async_trait]
pub trait LogStream: Send + Sync {
    async fn write(&self, log: &LogHandle, message: &str) -> anyhow::Result<()>;
}

/// When tides actually started running.
#[async_trait]
pub trait TideTimeline: Send + Sync {
    async fn start_date(&self, tide_uuid: Uuid) -> anyhow::Result<Option<DateTime<Utc>>>;
}

/// Running-tide counters and limits, per flow.
#[async_trait]
pub trait ConcurrencyRecords: Send + Sync {
    async fn find(&self, flow_uuid: Uuid) -> anyhow::Result<ConcurrencyRecord>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Loads tides from the event store.
#[derive(Clone)]
pub struct TideRepository {
    store: Arc<dyn EventStore>,
}

impl TideRepository {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub async fn find(&self, tide_uuid: Uuid) -> Result<Tide, RepositoryError> {
        let events = self.store.find(tide_uuid).await?;
        Tide::from_events(events).map_err(|source| RepositoryError::Corrupted { tide_uuid, source })
    }
}
