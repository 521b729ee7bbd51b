//! Metrics recorded by the orchestration core.
//!
//! These only use the `metrics` facade; the host process installs the
//! Prometheus exporter.

use metrics::{counter, histogram};

/// Record an event processed by the engine.
pub fn event_processed(kind: &str) {
    counter!("tide_events_processed_total", "event" => kind.to_string()).increment(1);
}

/// Record a tide reaching a status.
pub fn tide_status_changed(status: &str) {
    counter!("tide_status_total", "status" => status.to_string()).increment(1);
}

/// Record a tide start deferred by the concurrency gate.
pub fn tide_start_deferred() {
    counter!("tide_start_deferred_total").increment(1);
}

/// Record a task start.
pub fn task_started(kind: &str) {
    counter!("tide_tasks_started_total", "kind" => kind.to_string()).increment(1);
}

/// Record a command handed to an executor.
pub fn command_dispatched(kind: &str) {
    counter!("tide_executor_commands_total", "command" => kind.to_string()).increment(1);
}

/// Record a failed external notification (status or comment).
pub fn notification_failed(channel: &str) {
    counter!("tide_notifications_failed_total", "channel" => channel.to_string()).increment(1);
}

/// Record tide duration.
pub fn tide_duration(duration_secs: u64) {
    histogram!("tide_duration_seconds").record(duration_secs as f64);
}
