//! Tide event definitions for event sourcing.
//!
//! Every event carries the uuid of the tide it belongs to. Events are
//! immutable once created; a tide's history is the ordered list of events
//! appended to its stream.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flow::TideConfiguration;
use crate::task::build::BuildRequest;

/// Identifier of a task inside a flow's pipeline (e.g. `images`, `deployment`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle on a log stream. Tasks write into children of the tide's log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogHandle(String);

impl LogHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}/{}", self.0, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A repository on a source-control provider, e.g. `acme/api`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRepository {
    pub full_name: String,
}

impl CodeRepository {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
}

/// The commit a tide runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeReference {
    pub repository: CodeRepository,
    pub branch: String,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<u64>,
}

/// The parts of a flow a tide needs to remember.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowReference {
    pub uuid: Uuid,
    pub repository: CodeRepository,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicEndpoint {
    pub name: String,
    pub address: String,
}

/// Outcome of a successful deployment, as reported by the deployment backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub uuid: Uuid,
    pub environment: String,
    #[serde(default)]
    pub public_endpoints: Vec<PublicEndpoint>,
}

/// Events that can happen to a tide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TideEvent {
    /// Tide was requested by a code push or pull-request event.
    TideCreated {
        tide_uuid: Uuid,
        flow: FlowReference,
        code_reference: CodeReference,
        parent_log: LogHandle,
        configuration: TideConfiguration,
    },
    /// Tide passed the concurrency gate and is running.
    TideStarted {
        tide_uuid: Uuid,
        flow: FlowReference,
        code_reference: CodeReference,
        parent_log: LogHandle,
        configuration: TideConfiguration,
    },
    /// A task was started and handed to its executor.
    TaskQueued {
        tide_uuid: Uuid,
        task_id: TaskId,
        log: LogHandle,
    },
    /// The build task requested one image build per entry.
    ImageBuildsStarted {
        tide_uuid: Uuid,
        task_id: TaskId,
        build_requests: Vec<BuildRequest>,
    },
    BuildStarted {
        tide_uuid: Uuid,
        task_id: TaskId,
        build_uuid: Uuid,
    },
    BuildSuccessful {
        tide_uuid: Uuid,
        build_uuid: Uuid,
    },
    BuildFailed {
        tide_uuid: Uuid,
        build_uuid: Uuid,
        reason: String,
    },
    /// Every requested image build succeeded.
    ImagesBuilt { tide_uuid: Uuid },
    DeploymentStarted {
        tide_uuid: Uuid,
        task_id: TaskId,
        deployment_uuid: Uuid,
    },
    DeploymentSuccessful {
        tide_uuid: Uuid,
        deployment: Deployment,
    },
    DeploymentFailed {
        tide_uuid: Uuid,
        deployment_uuid: Uuid,
        reason: String,
    },
    RunStarted {
        tide_uuid: Uuid,
        task_id: TaskId,
        run_uuid: Uuid,
    },
    RunSuccessful {
        tide_uuid: Uuid,
        run_uuid: Uuid,
    },
    RunFailed {
        tide_uuid: Uuid,
        run_uuid: Uuid,
        reason: String,
    },
    TideSuccessful { tide_uuid: Uuid },
    TideFailed { tide_uuid: Uuid, reason: String },
}

impl TideEvent {
    pub fn tide_uuid(&self) -> Uuid {
        match self {
            Self::TideCreated { tide_uuid, .. }
            | Self::TideStarted { tide_uuid, .. }
            | Self::TaskQueued { tide_uuid, .. }
            | Self::ImageBuildsStarted { tide_uuid, .. }
            | Self::BuildStarted { tide_uuid, .. }
            | Self::BuildSuccessful { tide_uuid, .. }
            | Self::BuildFailed { tide_uuid, .. }
            | Self::ImagesBuilt { tide_uuid }
            | Self::DeploymentStarted { tide_uuid, .. }
            | Self::DeploymentSuccessful { tide_uuid, .. }
            | Self::DeploymentFailed { tide_uuid, .. }
            | Self::RunStarted { tide_uuid, .. }
            | Self::RunSuccessful { tide_uuid, .. }
            | Self::RunFailed { tide_uuid, .. }
            | Self::TideSuccessful { tide_uuid }
            | Self::TideFailed { tide_uuid, .. } => *tide_uuid,
        }
    }

    /// The task this event declares it belongs to, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::TaskQueued { task_id, .. }
            | Self::ImageBuildsStarted { task_id, .. }
            | Self::BuildStarted { task_id, .. }
            | Self::DeploymentStarted { task_id, .. }
            | Self::RunStarted { task_id, .. } => Some(task_id),
            Self::TideCreated { .. }
            | Self::TideStarted { .. }
            | Self::BuildSuccessful { .. }
            | Self::BuildFailed { .. }
            | Self::ImagesBuilt { .. }
            | Self::DeploymentSuccessful { .. }
            | Self::DeploymentFailed { .. }
            | Self::RunSuccessful { .. }
            | Self::RunFailed { .. }
            | Self::TideSuccessful { .. }
            | Self::TideFailed { .. } => None,
        }
    }

    /// Stable name of the variant, used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TideCreated { .. } => "tide_created",
            Self::TideStarted { .. } => "tide_started",
            Self::TaskQueued { .. } => "task_queued",
            Self::ImageBuildsStarted { .. } => "image_builds_started",
            Self::BuildStarted { .. } => "build_started",
            Self::BuildSuccessful { .. } => "build_successful",
            Self::BuildFailed { .. } => "build_failed",
            Self::ImagesBuilt { .. } => "images_built",
            Self::DeploymentStarted { .. } => "deployment_started",
            Self::DeploymentSuccessful { .. } => "deployment_successful",
            Self::DeploymentFailed { .. } => "deployment_failed",
            Self::RunStarted { .. } => "run_started",
            Self::RunSuccessful { .. } => "run_successful",
            Self::RunFailed { .. } => "run_failed",
            Self::TideSuccessful { .. } => "tide_successful",
            Self::TideFailed { .. } => "tide_failed",
        }
    }

    /// Whether this event ends the tide.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TideSuccessful { .. } | Self::TideFailed { .. })
    }
}
