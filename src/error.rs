use crate::pool::PoolKind;
use crate::task::TaskId;

/// Errors returned synchronously by the engine.
///
/// Failures raised inside a task body never surface here; they are captured
/// on the task as a [`TaskError`](crate::task::TaskError) and delivered
/// through the state publisher.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("task {0} is already registered")]
    DuplicateTask(TaskId),

    #[error("task {0} has already been submitted once; construct a fresh task")]
    AlreadySubmitted(TaskId),

    #[error("an observer is already subscribed")]
    ObserverAlreadySubscribed,

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("no deferred task with id {0}")]
    UnknownDeferredTask(TaskId),

    #[error("failed to spawn {pool} worker thread: {source}")]
    WorkerSpawn {
        pool: PoolKind,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn thread {name}: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl EngineError {
    /// True for caller-side misuse rejected at submission time.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateTask(_) | EngineError::AlreadySubmitted(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
