//! Build task: builds the flow's Docker images.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::TideEvent;
use crate::task::{
    accepts_by_task_id, task_details, task_queued, EventDrivenTask, ExecutorCommand, TaskContext,
    TaskError, TaskStart,
};

/// One image to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub service: String,
    pub image: String,
    pub tag: String,
    #[serde(default = "default_build_context")]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
}

fn default_build_context() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildTaskConfiguration {
    #[serde(default)]
    pub services: Vec<BuildRequest>,
}

#[derive(Debug, Clone)]
pub struct BuildTask {
    context: TaskContext,
    configuration: BuildTaskConfiguration,
    events: Vec<TideEvent>,
}

impl BuildTask {
    pub fn new(context: TaskContext, configuration: BuildTaskConfiguration) -> Self {
        Self {
            context,
            configuration,
            events: Vec::new(),
        }
    }

    pub fn configuration(&self) -> &BuildTaskConfiguration {
        &self.configuration
    }

    fn started_build(&self, build_uuid: &Uuid) -> bool {
        self.events.iter().any(|e| {
            matches!(e, TideEvent::BuildStarted { build_uuid: started, .. } if started == build_uuid)
        })
    }
}

impl EventDrivenTask for BuildTask {
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
        let tide_uuid = self.context.tide_uuid;
        let requests = self.configuration.services.clone();

        tracing::info!(
            tide_uuid = %tide_uuid,
            task_id = %self.context.task_id,
            images = requests.len(),
            "Building images"
        );

        let mut events = vec![
            task_queued(&self.context),
            TideEvent::ImageBuildsStarted {
                tide_uuid,
                task_id: self.context.task_id.clone(),
                build_requests: requests.clone(),
            },
        ];

        // Nothing will ever report back for an empty build list.
        if requests.is_empty() {
            events.push(TideEvent::ImagesBuilt { tide_uuid });
        }

        let details = task_details(&self.context);
        let commands = requests
            .into_iter()
            .map(|request| ExecutorCommand::BuildImage {
                tide_uuid,
                task: details.clone(),
                request,
            })
            .collect();

        Ok(TaskStart { events, commands })
    }

    fn accept(&self, event: &TideEvent) -> bool {
        if event.tide_uuid() != self.context.tide_uuid {
            return false;
        }

        match event {
            TideEvent::ImagesBuilt { .. } => self.is_started(),
            TideEvent::BuildSuccessful { build_uuid, .. }
            | TideEvent::BuildFailed { build_uuid, .. } => self.started_build(build_uuid),
            _ => accepts_by_task_id(&self.context, event),
        }
    }

    fn is_successful(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TideEvent::ImagesBuilt { .. }))
    }

    fn is_failed(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TideEvent::BuildFailed { .. }))
    }

    fn is_outcome(&self, event: &TideEvent) -> bool {
        matches!(
            event,
            TideEvent::ImagesBuilt { .. } | TideEvent::BuildFailed { .. }
        )
    }
}
