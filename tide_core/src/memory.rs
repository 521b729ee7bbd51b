//! In-process implementations of the storage ports.
//!
//! Used by the `tide-engine` host and by tests. State lives behind tokio
//! locks so concurrent readers never block each other.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::concurrency::ConcurrencyRecord;
use crate::events::{LogHandle, TideEvent};
use crate::ports::{ConcurrencyRecords, EventStore, LogStream, RepositoryError, TideTimeline};

#[derive(Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<Uuid, Vec<TideEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn find(&self, tide_uuid: Uuid) -> Result<Vec<TideEvent>, RepositoryError> {
        self.streams
            .read()
            .await
            .get(&tide_uuid)
            .cloned()
            .ok_or(RepositoryError::TideNotFound(tide_uuid))
    }

    async fn append(&self, event: TideEvent) -> Result<(), RepositoryError> {
        self.streams
            .write()
            .await
            .entry(event.tide_uuid())
            .or_default()
            .push(event);
        Ok(())
    }
}

#[derive(Default)]
struct RunningTides {
    running: HashMap<Uuid, usize>,
    flows: HashMap<Uuid, Uuid>,
    limits: HashMap<Uuid, Option<usize>>,
}

/// Counts running tides per flow from the events it observes.
pub struct InMemoryConcurrencyRecords {
    default_limit: Option<usize>,
    state: RwLock<RunningTides>,
}

impl InMemoryConcurrencyRecords {
    pub fn new(default_limit: Option<usize>) -> Self {
        Self {
            default_limit,
            state: RwLock::new(RunningTides::default()),
        }
    }

    /// Override the limit of one flow. `None` removes the limit.
    pub async fn set_limit(&self, flow_uuid: Uuid, limit: Option<usize>) {
        self.state.write().await.limits.insert(flow_uuid, limit);
    }

    pub async fn observe(&self, event: &TideEvent) {
        let mut state = self.state.write().await;
        match event {
            TideEvent::TideStarted {
                tide_uuid, flow, ..
            } => {
                if state.flows.insert(*tide_uuid, flow.uuid).is_none() {
                    *state.running.entry(flow.uuid).or_default() += 1;
                }
            }
            TideEvent::TideSuccessful { tide_uuid } | TideEvent::TideFailed { tide_uuid, .. } => {
                if let Some(flow_uuid) = state.flows.remove(tide_uuid) {
                    if let Some(running) = state.running.get_mut(&flow_uuid) {
                        *running = running.saturating_sub(1);
                    }
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ConcurrencyRecords for InMemoryConcurrencyRecords {
    async fn find(&self, flow_uuid: Uuid) -> anyhow::Result<ConcurrencyRecord> {
        let state = self.state.read().await;
        Ok(ConcurrencyRecord {
            running: state.running.get(&flow_uuid).copied().unwrap_or(0),
            limit: state
                .limits
                .get(&flow_uuid)
                .copied()
                .unwrap_or(self.default_limit),
        })
    }
}

/// Remembers when each tide started.
#[derive(Default)]
pub struct InMemoryTideTimeline {
    started: RwLock<HashMap<Uuid, DateTime<Utc>>>,
}

impl InMemoryTideTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `TideStarted` events at `at`. The first start is kept.
    pub async fn observe(&self, event: &TideEvent, at: DateTime<Utc>) {
        if let TideEvent::TideStarted { tide_uuid, .. } = event {
            self.started.write().await.entry(*tide_uuid).or_insert(at);
        }
    }
}

#[async_trait]
impl TideTimeline for InMemoryTideTimeline {
    async fn start_date(&self, tide_uuid: Uuid) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self.started.read().await.get(&tide_uuid).copied())
    }
}

#[derive(Default)]
pub struct InMemoryLogStream {
    lines: RwLock<HashMap<LogHandle, Vec<String>>>,
}

impl InMemoryLogStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lines(&self, log: &LogHandle) -> Vec<String> {
        self.lines.read().await.get(log).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LogStream for InMemoryLogStream {
    async fn write(&self, log: &LogHandle, message: &str) -> anyhow::Result<()> {
        self.lines
            .write()
            .await
            .entry(log.clone())
            .or_default()
            .push(message.to_string());
        Ok(())
    }
}
