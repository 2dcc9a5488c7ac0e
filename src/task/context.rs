use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Result};
use crate::task::record::{Task, TaskHandle};
use crate::task::types::*;
use std::sync::Weak;
use tracing::warn;

/// View of the engine handed to a running task body.
///
/// It is the only way for a body to record warnings, observe cancellation,
/// read the hand-off value of a sequential chain, or launch sub-work.
pub struct TaskContext {
    task: Task,
    previous: Option<TaskValue>,
    dispatcher: Weak<Dispatcher>,
}

impl TaskContext {
    pub(crate) fn new(task: Task, previous: Option<TaskValue>, dispatcher: Weak<Dispatcher>) -> Self {
        Self {
            task,
            previous,
            dispatcher,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn title(&self) -> &str {
        self.task.title()
    }

    /// Result of the previous task in the sequential chain.
    ///
    /// `None` for parallel tasks, for the first task of a chain, and after a
    /// predecessor failed or was cancelled.
    pub fn previous_result(&self) -> Option<&TaskValue> {
        self.previous.as_ref()
    }

    pub fn add_warning(&self, warning: impl Into<String>) {
        self.task.push_warning(warning.into());
    }

    /// Records a warning together with the error that caused it
    pub fn add_warning_with_error(
        &self,
        warning: impl Into<String>,
        error: &(dyn std::error::Error + 'static),
    ) {
        let warning = warning.into();
        warn!(task_id = %self.task.id(), error = %error, "{}", warning);
        self.task
            .push_warning(format!("{}\n{}", warning, error_chain(error)));
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.task.is_cancel_requested()
    }

    /// Safe point for cooperative cancellation: `Err(TaskError::Cancelled)`
    /// once cancellation was requested.
    pub fn checkpoint(&self) -> std::result::Result<(), TaskError> {
        if self.is_cancel_requested() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Launch another task without user-facing notifications.
    ///
    /// A sequential body that waits on a sequential sub-task deadlocks the
    /// chain; wait only on parallel sub-tasks.
    pub fn submit_silently(&self, task: Task, sequential: bool) -> Result<TaskHandle> {
        let dispatcher = self.dispatcher.upgrade().ok_or(EngineError::ShuttingDown)?;
        let mode = if sequential {
            ExecutionMode::SilentSequential
        } else {
            ExecutionMode::Silent
        };
        dispatcher.submit(task, mode)
    }
}
