//! Event-driven tasks: the build, deploy and run stages of a tide.
//!
//! A task holds no state of its own besides the events it accepted: whether
//! it is started, successful or failed is always computed from them.

pub mod build;
pub mod deploy;
pub mod run;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::configuration::ConfigurationError;
use crate::events::{CodeReference, FlowReference, LogHandle, TaskId, TideEvent};
use crate::flow::{TaskDefinition, TaskKind};

use self::build::{BuildRequest, BuildTask};
use self::deploy::{DeployTask, DeployTaskConfiguration};
use self::run::{RunTask, RunTaskConfiguration};

/// Where a task instance lives: its tide, its id in the pipeline, its log.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub tide_uuid: Uuid,
    pub log: LogHandle,
    pub flow: FlowReference,
    pub code_reference: CodeReference,
}

/// Identifies the task an executor works for, echoed back in its events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetails {
    pub task_id: TaskId,
    pub log: LogHandle,
}

/// Commands handed to the external builder, deployer and runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutorCommand {
    BuildImage {
        tide_uuid: Uuid,
        task: TaskDetails,
        request: BuildRequest,
    },
    Deploy {
        tide_uuid: Uuid,
        task: TaskDetails,
        environment: String,
        configuration: DeployTaskConfiguration,
    },
    StartRun {
        tide_uuid: Uuid,
        task: TaskDetails,
        configuration: RunTaskConfiguration,
    },
}

impl ExecutorCommand {
    pub fn tide_uuid(&self) -> Uuid {
        match self {
            Self::BuildImage { tide_uuid, .. }
            | Self::Deploy { tide_uuid, .. }
            | Self::StartRun { tide_uuid, .. } => *tide_uuid,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::BuildImage { .. } => "build_image",
            Self::Deploy { .. } => "deploy",
            Self::StartRun { .. } => "start_run",
        }
    }
}

/// What starting a task produced: events to publish and commands to dispatch.
#[derive(Debug, Clone, Default)]
pub struct TaskStart {
    pub events: Vec<TideEvent>,
    pub commands: Vec<ExecutorCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Successful,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("invalid configuration for task \"{task_id}\": {source}")]
    InvalidConfiguration {
        task_id: TaskId,
        #[source]
        source: serde_json::Error,
    },
}

/// Behaviour shared by every task variant.
pub trait EventDrivenTask {
    fn context(&self) -> &TaskContext;

    /// Events accepted so far, in order.
    fn events(&self) -> &[TideEvent];

    fn record(&mut self, event: TideEvent);

    /// Queue the task. Called once, when the previous stage completed.
    fn start(&mut self) -> Result<TaskStart, TaskError>;

    fn is_successful(&self) -> bool;

    fn is_failed(&self) -> bool;

    /// Whether `event` is one of this variant's success or failure events.
    fn is_outcome(&self, event: &TideEvent) -> bool;

    /// Whether `event` concerns this task instance.
    fn accept(&self, event: &TideEvent) -> bool {
        accepts_by_task_id(self.context(), event)
    }

    /// Record an accepted event. Once the task reached an outcome, later
    /// outcome events are ignored: the first one wins.
    fn apply(&mut self, event: TideEvent) {
        if self.is_outcome(&event) && (self.is_successful() || self.is_failed()) {
            tracing::warn!(
                tide_uuid = %self.context().tide_uuid,
                task_id = %self.context().task_id,
                event = event.kind(),
                "Ignoring outcome event for a task that already finished"
            );
            return;
        }

        self.record(event);
    }

    /// Accept and apply `event`, returning whether it was accepted.
    fn handle(&mut self, event: &TideEvent) -> bool {
        if !self.accept(event) {
            return false;
        }

        self.apply(event.clone());
        true
    }

    fn is_started(&self) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, TideEvent::TaskQueued { .. }))
    }

    fn status(&self) -> TaskStatus {
        if self.is_failed() {
            TaskStatus::Failed
        } else if self.is_successful() {
            TaskStatus::Successful
        } else if self.is_started() {
            TaskStatus::Running
        } else {
            TaskStatus::Pending
        }
    }
}

/// Default correlation: same tide and the event names this task.
pub fn accepts_by_task_id(context: &TaskContext, event: &TideEvent) -> bool {
    event.tide_uuid() == context.tide_uuid && event.task_id() == Some(&context.task_id)
}

pub(crate) fn task_queued(context: &TaskContext) -> TideEvent {
    TideEvent::TaskQueued {
        tide_uuid: context.tide_uuid,
        task_id: context.task_id.clone(),
        log: task_log(context),
    }
}

pub(crate) fn task_log(context: &TaskContext) -> LogHandle {
    context.log.child(context.task_id.as_str())
}

pub(crate) fn task_details(context: &TaskContext) -> TaskDetails {
    TaskDetails {
        task_id: context.task_id.clone(),
        log: task_log(context),
    }
}

/// A task of any kind.
#[derive(Debug, Clone)]
pub enum Task {
    Build(BuildTask),
    Deploy(DeployTask),
    Run(RunTask),
}

impl Task {
    pub fn from_definition(definition: &TaskDefinition, context: TaskContext) -> Self {
        match &definition.kind {
            TaskKind::Build(configuration) => {
                Task::Build(BuildTask::new(context, configuration.clone()))
            }
            TaskKind::Deploy(configuration) => {
                Task::Deploy(DeployTask::new(context, configuration.clone()))
            }
            TaskKind::Run(configuration) => Task::Run(RunTask::new(context, configuration.clone())),
        }
    }

    pub fn as_task(&self) -> &dyn EventDrivenTask {
        match self {
            Task::Build(task) => task,
            Task::Deploy(task) => task,
            Task::Run(task) => task,
        }
    }

    pub fn as_task_mut(&mut self) -> &mut dyn EventDrivenTask {
        match self {
            Task::Build(task) => task,
            Task::Deploy(task) => task,
            Task::Run(task) => task,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.as_task().context().task_id
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Task::Build(_) => "build",
            Task::Deploy(_) => "deploy",
            Task::Run(_) => "run",
        }
    }

    /// Failure reason from the first accepted failure event.
    pub fn failure_reason(&self) -> Option<String> {
        self.as_task().events().iter().find_map(|event| match event {
            TideEvent::BuildFailed { reason, .. }
            | TideEvent::DeploymentFailed { reason, .. }
            | TideEvent::RunFailed { reason, .. } => Some(reason.clone()),
            _ => None,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::events::{CodeRepository, User};

    pub fn context(tide_uuid: Uuid, task_id: &str) -> TaskContext {
        TaskContext {
            task_id: TaskId::new(task_id),
            tide_uuid,
            log: LogHandle::new(format!("tides/{tide_uuid}")),
            flow: FlowReference {
                uuid: Uuid::nil(),
                repository: CodeRepository::new("acme/api"),
                user: User {
                    username: "sam".to_string(),
                },
            },
            code_reference: CodeReference {
                repository: CodeRepository::new("acme/api"),
                branch: "main".to_string(),
                sha: "abc123".to_string(),
                pull_request: None,
            },
        }
    }
}
