//! Reconciliation task subsystem: records, registry and the worker pool.
//!
//! Long-running reconciliations return immediately with a task id; clients
//! poll via `reconciliation_status` and fetch the artifact once the task
//! completes. Task records live in-process only; the result artifact on
//! disk is the only state that outlives the server.

mod executor;
mod registry;

pub use executor::{spawn_executor, TaskExecutorHandle};
pub use registry::{TaskRegistry, TaskSnapshot};

use chrono::{DateTime, Utc};
use reconflow_engine::{Artifact, Schema};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Opaque task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(format!("task_{}", Uuid::new_v4().simple()))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task lifecycle. Terminal states are immutable; transitions that would
/// leave one are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running {
        started_at: DateTime<Utc>,
        /// Name of the pipeline phase currently executing.
        #[serde(skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
    },
    Completed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    Failed {
        started_at: Option<DateTime<Utc>>,
        finished_at: DateTime<Utc>,
        error: String,
    },
    Canceled {
        finished_at: DateTime<Utc>,
        /// Set to `TimedOut` when the wall-clock budget expired.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl TaskState {
    pub fn status_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running { .. } => "running",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Canceled { .. } => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Canceled { .. }
        )
    }
}

/// One reconciliation task.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub schema: Schema,
    pub files: Vec<PathBuf>,
    pub callback_url: Option<String>,
    /// Present once the task completed.
    pub artifact: Option<Artifact>,
}

impl Task {
    pub fn new(schema: Schema, files: Vec<PathBuf>, callback_url: Option<String>) -> Self {
        Self {
            id: TaskId::new(),
            state: TaskState::Pending,
            created_at: Utc::now(),
            schema,
            files,
            callback_url,
            artifact: None,
        }
    }

    /// `pending -> running`.
    pub fn start(&mut self) {
        if matches!(self.state, TaskState::Pending) {
            self.state = TaskState::Running {
                started_at: Utc::now(),
                phase: None,
            };
        }
    }

    pub fn set_phase(&mut self, name: &str) {
        if let TaskState::Running { started_at, .. } = self.state {
            self.state = TaskState::Running {
                started_at,
                phase: Some(name.to_string()),
            };
        }
    }

    /// `running -> completed`, recording the artifact.
    pub fn complete(&mut self, artifact: Artifact) {
        if let TaskState::Running { started_at, .. } = self.state {
            self.state = TaskState::Completed {
                started_at,
                finished_at: Utc::now(),
            };
            self.artifact = Some(artifact);
        }
    }

    /// `pending|running -> failed`.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        let started_at = match self.state {
            TaskState::Running { started_at, .. } => Some(started_at),
            _ => None,
        };
        self.state = TaskState::Failed {
            started_at,
            finished_at: Utc::now(),
            error: error.into(),
        };
    }

    /// `pending|running -> canceled`. Idempotent on terminal states.
    pub fn cancel(&mut self, error: Option<String>) {
        if !self.state.is_terminal() {
            self.state = TaskState::Canceled {
                finished_at: Utc::now(),
                error,
            };
        }
    }
}
