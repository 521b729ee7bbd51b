//! Event-sourced orchestration core for tides: one pipeline run of a flow
//! against one commit.
//!
//! A tide's state is rebuilt from its events ([`tide::Tide`]); its tasks
//! (image builds, deployments, runs) are state machines fed with the same
//! events ([`task`]); the [`engine::TideEngine`] glues both to the outside
//! world through the traits in [`ports`].

pub mod commands;
pub mod concurrency;
pub mod configuration;
pub mod engine;
pub mod events;
pub mod flow;
pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod ports;
pub mod status;
pub mod task;
pub mod tide;

pub use commands::{TideCommand, TideRequest};
pub use engine::{EngineError, StartOutcome, TideEngine};
pub use events::TideEvent;
pub use tide::{Tide, TideError, TideStatus};
