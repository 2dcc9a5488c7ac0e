use crate::dispatcher::Dispatcher;
use crate::publisher::EventSender;
use crate::task::context::TaskContext;
use crate::task::record::{Outcome, Task};
use crate::task::types::*;
use chrono::Utc;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Weak;
use tracing::{debug, info, info_span, warn};

/// Drive one task from `Pending` to a terminal state on the current thread.
///
/// Returns `None` when the task had already been claimed elsewhere (for
/// example resolved as cancelled while still queued).
pub(crate) fn execute(
    task: &Task,
    previous: Option<TaskValue>,
    dispatcher: Weak<Dispatcher>,
    events: &EventSender,
) -> Option<Outcome> {
    if !task.try_claim() {
        debug!("Task {} already resolved, skipping", task.id());
        return None;
    }

    if task.is_cancel_requested() {
        debug!("Task {} cancelled before start", task.id());
        events.finished(task, Utc::now(), Outcome::Cancelled);
        return Some(Outcome::Cancelled);
    }

    events.started(task, Utc::now());

    let span = info_span!("task", id = %task.id(), title = %task.title());
    let _entered = span.enter();

    let outcome = match task.take_body() {
        Some(body) => {
            let context = TaskContext::new(task.clone(), previous, dispatcher);
            match catch_unwind(AssertUnwindSafe(|| body(&context))) {
                Ok(result) => classify(task, result),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!("Task body panicked: {}", message);
                    if task.is_cancel_requested() {
                        Outcome::Cancelled
                    } else {
                        Outcome::Failed(TaskError::Panicked { message })
                    }
                }
            }
        }
        None => Outcome::Failed(TaskError::failed("task body was already consumed")),
    };

    match &outcome {
        Outcome::Succeeded(_) => info!("Task completed"),
        Outcome::Failed(error) => warn!("Task failed: {}", error),
        Outcome::Cancelled => info!("Task cancelled"),
    }

    events.finished(task, Utc::now(), outcome.clone());
    Some(outcome)
}

/// Resolve a task that never started as cancelled. Returns false if a worker
/// claimed it first.
pub(crate) fn resolve_cancelled(task: &Task, events: &EventSender) -> bool {
    if !task.try_claim() {
        return false;
    }
    events.finished(task, Utc::now(), Outcome::Cancelled);
    true
}

fn classify(task: &Task, result: Result<TaskValue, TaskError>) -> Outcome {
    // An observed cancellation request wins over whatever the body returned
    if task.is_cancel_requested() {
        return Outcome::Cancelled;
    }
    match result {
        Ok(value) => Outcome::Succeeded(value),
        Err(error) => Outcome::Failed(error),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
