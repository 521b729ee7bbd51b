//! Pipeline: runs a tide's tasks one after the other.
//!
//! Task instances are rebuilt from the tide's configuration on every event
//! and replayed with the tide's history; the new event is then fed to every
//! task and the pipeline reacts to the status changes it caused.

use uuid::Uuid;

use crate::events::{TaskId, TideEvent};
use crate::task::{ExecutorCommand, Task, TaskContext, TaskStatus};
use crate::tide::Tide;

/// Events to publish and commands to dispatch in response to one event.
#[derive(Debug, Clone, Default)]
pub struct Reaction {
    pub events: Vec<TideEvent>,
    pub commands: Vec<ExecutorCommand>,
}

impl Reaction {
    fn fail(tide_uuid: Uuid, reason: String) -> Self {
        Self {
            events: vec![TideEvent::TideFailed { tide_uuid, reason }],
            commands: Vec::new(),
        }
    }
}

enum Transition {
    Succeeded,
    BuildFailed,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    tide_uuid: Uuid,
    tasks: Vec<Task>,
}

impl Pipeline {
    pub fn for_tide(tide: &Tide) -> Self {
        let tasks = tide
            .configuration()
            .tasks
            .iter()
            .map(|definition| {
                let context = TaskContext {
                    task_id: definition.id.clone(),
                    tide_uuid: tide.uuid(),
                    log: tide.parent_log().clone(),
                    flow: tide.flow().clone(),
                    code_reference: tide.code_reference().clone(),
                };
                Task::from_definition(definition, context)
            })
            .collect();

        Self {
            tide_uuid: tide.uuid(),
            tasks,
        }
    }

    /// Feed past events to the tasks without reacting to them.
    pub fn replay<'a>(&mut self, events: impl IntoIterator<Item = &'a TideEvent>) {
        for event in events {
            self.feed(event);
        }
    }

    fn feed(&mut self, event: &TideEvent) {
        for task in &mut self.tasks {
            task.as_task_mut().handle(event);
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn statuses(&self) -> Vec<(TaskId, TaskStatus)> {
        self.tasks
            .iter()
            .map(|task| (task.id().clone(), task.as_task().status()))
            .collect()
    }

    /// Feed `event` to the tasks and decide what happens next. `tide` must
    /// already have the event applied.
    pub fn react(&mut self, tide: &Tide, event: &TideEvent) -> Reaction {
        let before: Vec<TaskStatus> = self.tasks.iter().map(|t| t.as_task().status()).collect();
        self.feed(event);

        if tide.is_finished() {
            return Reaction::default();
        }

        if matches!(event, TideEvent::TideStarted { .. }) {
            return self.start_next();
        }

        let transition = self
            .tasks
            .iter()
            .zip(before)
            .find_map(|(task, previous)| {
                let status = task.as_task().status();
                if status == previous {
                    return None;
                }

                match status {
                    TaskStatus::Successful => Some(Transition::Succeeded),
                    // A failed build already derives `TideFailed` in the aggregate.
                    TaskStatus::Failed if matches!(task, Task::Build(_)) => {
                        Some(Transition::BuildFailed)
                    }
                    TaskStatus::Failed => Some(Transition::Failed(match task.failure_reason() {
                        Some(reason) => format!("Task \"{}\" failed: {reason}", task.id()),
                        None => format!("Task \"{}\" failed", task.id()),
                    })),
                    TaskStatus::Pending | TaskStatus::Running => None,
                }
            });

        match transition {
            Some(Transition::Succeeded) => self.start_next(),
            Some(Transition::Failed(reason)) => Reaction::fail(self.tide_uuid, reason),
            Some(Transition::BuildFailed) | None => Reaction::default(),
        }
    }

    /// Start the first pending task once every task before it succeeded, or
    /// finish the tide when all of them did.
    fn start_next(&mut self) -> Reaction {
        for task in &mut self.tasks {
            match task.as_task().status() {
                TaskStatus::Successful => continue,
                TaskStatus::Running | TaskStatus::Failed => return Reaction::default(),
                TaskStatus::Pending => {}
            }

            let task_id = task.id().clone();
            let kind = task.kind();
            return match task.as_task_mut().start() {
                Ok(start) => {
                    crate::metrics::task_started(kind);
                    Reaction {
                        events: start.events,
                        commands: start.commands,
                    }
                }
                Err(e) => {
                    tracing::error!(
                        tide_uuid = %self.tide_uuid,
                        task_id = %task_id,
                        "Task failed to start: {e}"
                    );
                    Reaction::fail(
                        self.tide_uuid,
                        format!("Task \"{task_id}\" could not start: {e}"),
                    )
                }
            };
        }

        tracing::info!(tide_uuid = %self.tide_uuid, "All tasks successful");
        Reaction {
            events: vec![TideEvent::TideSuccessful {
                tide_uuid: self.tide_uuid,
            }],
            commands: Vec::new(),
        }
    }
}
