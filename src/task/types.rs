use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for tasks
pub type TaskId = Uuid;

/// Opaque value produced by a successful task body
pub type TaskValue = serde_json::Value;

/// Capabilities a task can carry. A task may satisfy several at once.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Latency-sensitive work routed to the elastic pool
    ShortRunning,
    /// Heavy work routed to the bounded fixed pool
    LongRunning,
    /// Produces files in an output directory the user may want to open
    DirectoryOutputting,
    /// Provided by a plugin; routing depends on its `long_running` flag
    Pluggable,
    /// Saved for later execution, optionally with a run date
    Saved,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::ShortRunning,
        TaskKind::LongRunning,
        TaskKind::DirectoryOutputting,
        TaskKind::Pluggable,
        TaskKind::Saved,
    ];

    const fn bit(self) -> u8 {
        match self {
            TaskKind::ShortRunning => 1,
            TaskKind::LongRunning => 1 << 1,
            TaskKind::DirectoryOutputting => 1 << 2,
            TaskKind::Pluggable => 1 << 3,
            TaskKind::Saved => 1 << 4,
        }
    }
}

/// Capability set of a task
#[derive(Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TaskKinds(u8);

impl TaskKinds {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with(self, kind: TaskKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn insert(&mut self, kind: TaskKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: TaskKind) {
        self.0 &= !kind.bit();
    }

    pub const fn contains(self, kind: TaskKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = TaskKind> {
        TaskKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl From<TaskKind> for TaskKinds {
    fn from(kind: TaskKind) -> Self {
        Self::empty().with(kind)
    }
}

impl FromIterator<TaskKind> for TaskKinds {
    fn from_iter<I: IntoIterator<Item = TaskKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Debug for TaskKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Lifecycle state of a task
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TaskState {
    /// Submitted (or not yet submitted) and waiting for a worker
    #[default]
    Pending,
    /// Body is executing on a worker thread
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: TaskState) -> bool {
        match (self, next) {
            (TaskState::Pending, TaskState::Running) => true,
            (TaskState::Pending, TaskState::Cancelled) => true,
            (TaskState::Running, s) => s.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// How a submitted task is routed and whether it produces user-facing notices
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ExecutionMode {
    /// Fixed or elastic pool depending on the task kind
    #[default]
    Parallel,
    /// Single-worker pool, strict submission order
    Sequential,
    /// Parallel routing without notifications
    Silent,
    /// Sequential routing without notifications
    SilentSequential,
}

impl ExecutionMode {
    pub fn is_sequential(self) -> bool {
        matches!(self, ExecutionMode::Sequential | ExecutionMode::SilentSequential)
    }

    pub fn is_silent(self) -> bool {
        matches!(self, ExecutionMode::Silent | ExecutionMode::SilentSequential)
    }
}

/// Where a directory-outputting task leaves its results
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OutputLocation {
    pub directory: PathBuf,
    pub message: String,
    pub button_text: String,
}

impl OutputLocation {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            message: String::new(),
            button_text: "Outputs".to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_button_text(mut self, text: impl Into<String>) -> Self {
        self.button_text = text.into();
        self
    }
}

/// Failure captured from a task body
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The body lacked an authorization; carries the missing permission
    #[error("permission denied: {permission}")]
    PermissionDenied { permission: String },

    /// Returned by [`TaskContext::checkpoint`](super::TaskContext::checkpoint)
    /// once cancellation has been requested
    #[error("task was cancelled")]
    Cancelled,

    #[error("task panicked: {message}")]
    Panicked { message: String },

    #[error("{message}")]
    Failed {
        message: String,
        cause: Option<String>,
    },
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed {
            message: message.into(),
            cause: None,
        }
    }

    pub fn permission_denied(permission: impl Into<String>) -> Self {
        TaskError::PermissionDenied {
            permission: permission.into(),
        }
    }

    /// Wraps an arbitrary error, keeping its source chain as the cause
    pub fn from_error(message: impl Into<String>, error: &(dyn std::error::Error + 'static)) -> Self {
        TaskError::Failed {
            message: message.into(),
            cause: Some(error_chain(error)),
        }
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, TaskError::PermissionDenied { .. })
    }

    pub fn permission(&self) -> Option<&str> {
        match self {
            TaskError::PermissionDenied { permission } => Some(permission),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        // Keep authorization failures distinguishable when they travel through anyhow
        match error.downcast::<TaskError>() {
            Ok(task_error) => task_error,
            Err(error) => TaskError::Failed {
                message: error.to_string(),
                cause: error.source().map(error_chain),
            },
        }
    }
}

impl From<std::io::Error> for TaskError {
    fn from(error: std::io::Error) -> Self {
        TaskError::Failed {
            message: error.to_string(),
            cause: None,
        }
    }
}

pub(crate) fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}
