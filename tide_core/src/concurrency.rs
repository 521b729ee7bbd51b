//! Flow-level concurrency gate for tide starts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ports::ConcurrencyRecords;
use crate::tide::Tide;

/// Delay before a denied `StartTide` is tried again.
pub const START_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Running tides of a flow and the flow's limit, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyRecord {
    pub running: usize,
    pub limit: Option<usize>,
}

impl ConcurrencyRecord {
    pub fn allows_start(&self) -> bool {
        match self.limit {
            Some(limit) => self.running < limit,
            None => true,
        }
    }
}

#[async_trait]
pub trait TideConcurrencyManager: Send + Sync {
    async fn should_tide_start(&self, tide: &Tide) -> anyhow::Result<bool>;
}

pub struct FlowConcurrencyManager {
    records: Arc<dyn ConcurrencyRecords>,
}

impl FlowConcurrencyManager {
    pub fn new(records: Arc<dyn ConcurrencyRecords>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl TideConcurrencyManager for FlowConcurrencyManager {
    async fn should_tide_start(&self, tide: &Tide) -> anyhow::Result<bool> {
        let record = self.records.find(tide.flow().uuid).await?;
        let allowed = record.allows_start();

        tracing::debug!(
            tide_uuid = %tide.uuid(),
            flow_uuid = %tide.flow().uuid,
            running = record.running,
            limit = ?record.limit,
            allowed,
            "Concurrency checked"
        );

        Ok(allowed)
    }
}
