//! Deploy task: deploys the built images to a cluster environment.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{Deployment, TideEvent};
use crate::task::{
    accepts_by_task_id, task_details, task_queued, EventDrivenTask, ExecutorCommand, TaskContext,
    TaskError, TaskStart,
};

/// Environment names are capped to fit Kubernetes namespace names.
const MAX_ENVIRONMENT_NAME_LENGTH: usize = 63;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployTaskConfiguration {
    pub cluster: String,
    /// Explicit environment name; derived from the flow and branch when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeployTask {
    context: TaskContext,
    configuration: DeployTaskConfiguration,
    events: Vec<TideEvent>,
}

impl DeployTask {
    pub fn new(context: TaskContext, configuration: DeployTaskConfiguration) -> Self {
        Self {
            context,
            configuration,
            events: Vec::new(),
        }
    }

    pub fn environment_name(&self) -> String {
        match &self.configuration.environment {
            Some(name) => name.clone(),
            None => slugify(&format!(
                "{}-{}",
                self.context.flow.uuid, self.context.code_reference.branch
            )),
        }
    }

    /// The deployment reported as successful, if any.
    pub fn deployment(&self) -> Option<&Deployment> {
        self.events.iter().find_map(|e| match e {
            TideEvent::DeploymentSuccessful { deployment, .. } => Some(deployment),
            _ => None,
        })
    }

    fn started_deployment(&self, deployment_uuid: &Uuid) -> bool {
        self.events.iter().any(|e| {
            matches!(e, TideEvent::DeploymentStarted { deployment_uuid: started, .. } if started == deployment_uuid)
        })
    }
}

impl EventDrivenTask for DeployTask {
    fn context(&self) -> &TaskContext {
        &self.context
    }

    fn events(&self) -> &[TideEvent] {
        &self.events
    }

    fn record(&mut self, event: TideEvent) {
        self.events.push(event);
    }

    fn start(&mut self) -> Result<TaskStart, TaskError> {
        let environment = self.environment_name();

        tracing::info!(
            tide_uuid = %self.context.tide_uuid,
            task_id = %self.context.task_id,
            cluster = %self.configuration.cluster,
            environment = %environment,
            "Deploying environment"
        );

        Ok(TaskStart {
            events: vec![task_queued(&self.context)],
            commands: vec![ExecutorCommand::Deploy {
                tide_uuid: self.context.tide_uuid,
                task: task_details(&self.context),
                environment,
                configuration: self.configuration.clone(),
            }],
        })
    }

    fn accept(&self, event: &TideEvent) -> bool {
        if event.tide_uuid() != self.context.tide_uuid {
            return false;
        }

        match event {
            TideEvent::DeploymentSuccessful { deployment, .. } => {
                self.started_deployment(&deployment.uuid)
            }
            TideEvent::DeploymentFailed {
                deployment_uuid, ..
            } => self.started_deployment(deployment_uuid),
            _ => accepts_by_task_id(&self.context, event),
        }
    }

    fn is_successful(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TideEvent::DeploymentSuccessful { .. }))
    }

    fn is_failed(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TideEvent::DeploymentFailed { .. }))
    }

    fn is_outcome(&self, event: &TideEvent) -> bool {
        matches!(
            event,
            TideEvent::DeploymentSuccessful { .. } | TideEvent::DeploymentFailed { .. }
        )
    }
}

/// Lowercase, replace anything not alphanumeric with `-`, collapse repeats.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let slug = slug.trim_matches('-');
    let mut slug: String = slug.chars().take(MAX_ENVIRONMENT_NAME_LENGTH).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
