//! Flow: the configured pipeline that tides run against.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{CodeReference, CodeRepository, FlowReference, TaskId, User};
use crate::task::build::BuildTaskConfiguration;
use crate::task::deploy::DeployTaskConfiguration;
use crate::task::run::RunTaskConfiguration;

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("tasks \"{first}\" and \"{second}\" both build images; a tide runs at most one build task")]
    MultipleBuildTasks { first: TaskId, second: TaskId },
}

/// A registered repository with its pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub uuid: Uuid,
    pub repository: CodeRepository,
    pub user: User,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    /// Maximum number of tides of this flow running at the same time.
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
}

impl Flow {
    pub fn reference(&self) -> FlowReference {
        FlowReference {
            uuid: self.uuid,
            repository: self.repository.clone(),
            user: self.user.clone(),
        }
    }

    /// Resolve the task list a tide for `code_reference` will run.
    pub fn tide_configuration(
        &self,
        code_reference: &CodeReference,
    ) -> Result<TideConfiguration, FlowError> {
        tracing::debug!(
            flow_uuid = %self.uuid,
            branch = %code_reference.branch,
            tasks = self.tasks.len(),
            "Resolving tide configuration"
        );

        let configuration = TideConfiguration {
            tasks: self.tasks.clone(),
        };
        configuration.validate()?;
        Ok(configuration)
    }
}

/// The fully-resolved pipeline of a single tide, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TideConfiguration {
    pub tasks: Vec<TaskDefinition>,
}

impl TideConfiguration {
    /// Build outcomes carry no task id, so two build tasks could not tell
    /// their images apart.
    pub fn validate(&self) -> Result<(), FlowError> {
        let mut builds = self
            .tasks
            .iter()
            .filter(|task| matches!(task.kind, TaskKind::Build(_)));

        match (builds.next(), builds.next()) {
            (Some(first), Some(second)) => Err(FlowError::MultipleBuildTasks {
                first: first.id.clone(),
                second: second.id.clone(),
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    #[serde(flatten)]
    pub kind: TaskKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    Build(BuildTaskConfiguration),
    Deploy(DeployTaskConfiguration),
    Run(RunTaskConfiguration),
}
