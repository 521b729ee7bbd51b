//! Run task: runs commands in a container, usually against a deployed environment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::configuration::{
    replace_values, resolve_variables, EnvironmentVariable, ExpressionContext,
};
use crate::events::TideEvent;
use crate::task::{
    accepts_by_task_id, task_details, task_queued, EventDrivenTask, ExecutorCommand, TaskContext,
    TaskError, TaskStart,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTaskConfiguration {
    pub cluster: String,
    pub image: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub environment_variables: Vec<EnvironmentVariable>,
}

impl RunTaskConfiguration {
    /// Set `name` to `value`, replacing an existing variable of that name.
    pub fn add_environment_variable(&mut self, name: &str, value: &str) {
        match self
            .environment_variables
            .iter_mut()
            .find(|variable| variable.name == name)
        {
            Some(variable) => variable.value = value.to_string(),
            None => self
                .environment_variables
                .push(EnvironmentVariable::new(name, value)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunTask {
    context: TaskContext,
    configuration: RunTaskConfiguration,
    events: Vec<TideEvent>,
}

impl RunTask {
    pub fn new(context: TaskContext, configuration: RunTaskConfiguration) -> Self {
        Self {
            context,
            configuration,
            events: Vec::new(),
        }
    }

    pub fn configuration(&self) -> &RunTaskConfiguration {
        &self.configuration
    }

    fn run_started_uuid(&self) -> Option<Uuid> {
        self.events.iter().find_map(|e| match e {
            TideEvent::RunStarted { run_uuid, .. } => Some(*run_uuid),
            _ => None,
        })
    }

    /// `SERVICE_<NAME>_PUBLIC_ENDPOINT` for every endpoint of every accepted
    /// deployment. Later deployments win.
    pub fn public_endpoint_variables(&self) -> BTreeMap<String, String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TideEvent::DeploymentSuccessful { deployment, .. } => Some(deployment),
                _ => None,
            })
            .flat_map(|deployment| deployment.public_endpoints.iter())
            .fold(BTreeMap::new(), |mut mapping, endpoint| {
                mapping.insert(
                    format!(
                        "SERVICE_{}_PUBLIC_ENDPOINT",
                        endpoint.name.to_uppercase()
                    ),
                    endpoint.address.clone(),
                );
                mapping
            })
    }

    /// The configuration the runner receives: variables evaluated, deployment
    /// endpoints added, and placeholders substituted.
    pub fn resolved_configuration(&self) -> Result<RunTaskConfiguration, TaskError> {
        let expression_context =
            ExpressionContext::new(&self.context.code_reference, self.context.flow.uuid);

        let mut configuration = self.configuration.clone();
        configuration.environment_variables =
            resolve_variables(&configuration.environment_variables, &expression_context)?;

        let endpoints = self.public_endpoint_variables();
        for (name, address) in &endpoints {
            configuration.add_environment_variable(name, address);
        }

        let mut mapping: BTreeMap<String, String> = configuration
            .environment_variables
            .iter()
            .map(|variable| (variable.name.clone(), variable.value.clone()))
            .collect();
        mapping.extend(endpoints);

        let invalid = |source| TaskError::InvalidConfiguration {
            task_id: self.context.task_id.clone(),
            source,
        };
        let mut value = serde_json::to_value(&configuration).map_err(invalid)?;
        replace_values(&mut value, &mapping);

        serde_json::from_value(value).map_err(invalid)
    }
}

impl EventDrivenTask for RunTask {
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
        let configuration = self.resolved_configuration()?;

        tracing::info!(
            tide_uuid = %self.context.tide_uuid,
            task_id = %self.context.task_id,
            image = %configuration.image,
            "Running \"{}\"",
            self.context.task_id
        );

        Ok(TaskStart {
            events: vec![task_queued(&self.context)],
            commands: vec![ExecutorCommand::StartRun {
                tide_uuid: self.context.tide_uuid,
                task: task_details(&self.context),
                configuration,
            }],
        })
    }

    fn accept(&self, event: &TideEvent) -> bool {
        if event.tide_uuid() != self.context.tide_uuid {
            return false;
        }

        match event {
            TideEvent::DeploymentSuccessful { .. } => true,
            TideEvent::RunFailed { run_uuid, .. } | TideEvent::RunSuccessful { run_uuid, .. } => {
                self.run_started_uuid() == Some(*run_uuid)
            }
            _ => accepts_by_task_id(&self.context, event),
        }
    }

    fn is_successful(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TideEvent::RunSuccessful { .. }))
    }

    fn is_failed(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TideEvent::RunFailed { .. }))
    }

    fn is_outcome(&self, event: &TideEvent) -> bool {
        matches!(
            event,
            TideEvent::RunSuccessful { .. } | TideEvent::RunFailed { .. }
        )
    }
}
