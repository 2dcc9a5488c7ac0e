use crate::dispatcher::Dispatcher;
use crate::task::context::TaskContext;
use crate::task::types::*;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Body of a task, executed exactly once on a worker thread
pub type TaskBody = Box<dyn FnOnce(&TaskContext) -> Result<TaskValue, TaskError> + Send + 'static>;

/// A unit of asynchronous, cancellable work.
///
/// `Task` is a cheap, clonable handle; every clone refers to the same unit of
/// work. Tasks are created by callers and handed to the engine, which drives
/// all state transitions.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    id: TaskId,
    title: String,
    kinds: TaskKinds,
    options: TaskOptions,
    body: Mutex<Option<TaskBody>>,
    submitted: AtomicBool,
    claimed: AtomicBool,
    cancel_requested: AtomicBool,
    record: Mutex<TaskRecord>,
    finished: Condvar,
    followers: Mutex<Vec<Task>>,
}

/// Flags fixed at construction that drive routing and notification
#[derive(Clone, Debug)]
struct TaskOptions {
    notify_on_success: bool,
    long_running: bool,
    output: Option<OutputLocation>,
    scheduled_at: Option<DateTime<Utc>>,
    follower_mode: ExecutionMode,
}

/// Mutable lifecycle data. State, timestamps, result and failure are written
/// by the state publisher; warnings by the executing worker.
#[derive(Debug, Default)]
pub(crate) struct TaskRecord {
    pub state: TaskState,
    pub mode: Option<ExecutionMode>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: Option<TaskValue>,
    pub failure: Option<TaskError>,
    pub warnings: Vec<String>,
    /// Set once the terminal transition has been fully processed
    pub published: bool,
}

/// Terminal outcome computed by a worker, applied by the publisher
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Succeeded(TaskValue),
    Failed(TaskError),
    Cancelled,
}

impl Outcome {
    pub fn state(&self) -> TaskState {
        match self {
            Outcome::Succeeded(_) => TaskState::Succeeded,
            Outcome::Failed(_) => TaskState::Failed,
            Outcome::Cancelled => TaskState::Cancelled,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid transition {from} -> {to}")]
pub(crate) struct InvalidTransition {
    pub from: TaskState,
    pub to: TaskState,
}

impl Task {
    /// Start building a task with the given display title
    pub fn builder(title: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(title)
    }

    /// Create a task with default flags
    pub fn new<F>(title: impl Into<String>, kinds: impl Into<TaskKinds>, body: F) -> Self
    where
        F: FnOnce(&TaskContext) -> Result<TaskValue, TaskError> + Send + 'static,
    {
        TaskBuilder::new(title).kinds(kinds).build(body)
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    pub fn kinds(&self) -> TaskKinds {
        self.inner.kinds
    }

    pub fn has_kind(&self, kind: TaskKind) -> bool {
        self.inner.kinds.contains(kind)
    }

    pub fn notify_on_success(&self) -> bool {
        self.inner.options.notify_on_success
    }

    /// Long-running tasks, and plugin tasks flagged as long-running
    pub fn is_long_running(&self) -> bool {
        self.has_kind(TaskKind::LongRunning)
            || (self.has_kind(TaskKind::Pluggable) && self.inner.options.long_running)
    }

    pub fn is_short_running(&self) -> bool {
        self.has_kind(TaskKind::ShortRunning)
    }

    pub fn is_deferred(&self) -> bool {
        self.has_kind(TaskKind::Saved)
    }

    /// Output location of directory-outputting tasks (including plugin tasks)
    pub fn output_location(&self) -> Option<&OutputLocation> {
        if self.has_kind(TaskKind::DirectoryOutputting) || self.has_kind(TaskKind::Pluggable) {
            self.inner.options.output.as_ref()
        } else {
            None
        }
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.inner.options.scheduled_at
    }

    pub fn state(&self) -> TaskState {
        self.inner.record.lock().state
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Mode the task was submitted with, once submitted
    pub fn mode(&self) -> Option<ExecutionMode> {
        self.inner.record.lock().mode
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.inner.record.lock().submitted_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.record.lock().started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.inner.record.lock().ended_at
    }

    /// Time spent running. Zero for tasks that never started; measured up to
    /// now for tasks still running.
    pub fn duration(&self) -> Duration {
        let record = self.inner.record.lock();
        match record.started_at {
            Some(start) => {
                let end = record.ended_at.unwrap_or_else(Utc::now);
                (end - start).to_std().unwrap_or_default()
            }
            None => Duration::ZERO,
        }
    }

    pub fn result(&self) -> Option<TaskValue> {
        self.inner.record.lock().result.clone()
    }

    pub fn failure(&self) -> Option<TaskError> {
        self.inner.record.lock().failure.clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.inner.record.lock().warnings.clone()
    }

    pub fn has_warnings(&self) -> bool {
        !self.inner.record.lock().warnings.is_empty()
    }

    /// Ask the task to stop. Cooperative: the body has to observe the flag.
    pub fn request_cancel(&self) {
        self.inner.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    /// Tasks submitted automatically after this one succeeds
    pub fn followers(&self) -> Vec<Task> {
        self.inner.followers.lock().clone()
    }

    pub fn follower_mode(&self) -> ExecutionMode {
        self.inner.options.follower_mode
    }

    pub fn add_follower(&self, task: Task) {
        self.inner.followers.lock().push(task);
    }

    /// Block until the terminal state has been published: the registry entry
    /// is gone and the history entry exists.
    pub fn wait(&self) -> TaskState {
        let mut record = self.inner.record.lock();
        while !record.published {
            self.inner.finished.wait(&mut record);
        }
        record.state
    }

    /// Like [`Task::wait`], giving up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskState> {
        let mut record = self.inner.record.lock();
        let deadline = std::time::Instant::now() + timeout;
        while !record.published {
            if self
                .inner
                .finished
                .wait_until(&mut record, deadline)
                .timed_out()
            {
                return record.published.then_some(record.state);
            }
        }
        Some(record.state)
    }

    pub(crate) fn mark_submitted(&self, mode: ExecutionMode) -> bool {
        if self.inner.submitted.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut record = self.inner.record.lock();
        record.mode = Some(mode);
        record.submitted_at = Some(Utc::now());
        true
    }

    /// Re-records the mode when a deferred task is released into a pool
    pub(crate) fn set_mode(&self, mode: ExecutionMode) {
        self.inner.record.lock().mode = Some(mode);
    }

    /// Claim the task for execution. Exactly one caller ever wins, whether it
    /// is a worker about to run the body or a canceller resolving a task that
    /// never started.
    pub(crate) fn try_claim(&self) -> bool {
        self.inner
            .claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn take_body(&self) -> Option<TaskBody> {
        self.inner.body.lock().take()
    }

    pub(crate) fn push_warning(&self, warning: String) {
        self.inner.record.lock().warnings.push(warning);
    }

    pub(crate) fn apply_start(&self, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        let mut record = self.inner.record.lock();
        let from = record.state;
        if !from.can_transition_to(TaskState::Running) {
            return Err(InvalidTransition {
                from,
                to: TaskState::Running,
            });
        }
        record.state = TaskState::Running;
        record.started_at = Some(at);
        Ok(())
    }

    pub(crate) fn apply_finish(
        &self,
        at: DateTime<Utc>,
        outcome: Outcome,
    ) -> Result<(), InvalidTransition> {
        let mut record = self.inner.record.lock();
        let from = record.state;
        let to = outcome.state();
        if !from.can_transition_to(to) {
            return Err(InvalidTransition { from, to });
        }
        match outcome {
            Outcome::Succeeded(value) => record.result = Some(value),
            Outcome::Failed(error) => record.failure = Some(error),
            Outcome::Cancelled => {}
        }
        record.state = to;
        record.ended_at = Some(at);
        Ok(())
    }

    /// Wake everyone blocked in `wait`
    pub(crate) fn mark_published(&self) {
        self.inner.record.lock().published = true;
        self.inner.finished.notify_all();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("title", &self.inner.title)
            .field("kinds", &self.inner.kinds)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Task {}

/// Builder for [`Task`]
pub struct TaskBuilder {
    id: Option<TaskId>,
    title: String,
    kinds: TaskKinds,
    options: TaskOptions,
    followers: Vec<Task>,
}

impl TaskBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            kinds: TaskKinds::empty(),
            options: TaskOptions {
                notify_on_success: true,
                long_running: false,
                output: None,
                scheduled_at: None,
                follower_mode: ExecutionMode::Parallel,
            },
            followers: Vec::new(),
        }
    }

    /// Use an explicit identifier, e.g. for a persisted task re-entering the engine
    pub fn id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn kinds(mut self, kinds: impl Into<TaskKinds>) -> Self {
        self.kinds = kinds.into();
        self
    }

    pub fn notify_on_success(mut self, notify: bool) -> Self {
        self.options.notify_on_success = notify;
        self
    }

    /// Marks a plugin task as long-running so it is reported like one
    pub fn long_running(mut self, long_running: bool) -> Self {
        self.options.long_running = long_running;
        self
    }

    pub fn output_location(mut self, output: OutputLocation) -> Self {
        if !self.kinds.contains(TaskKind::Pluggable) {
            self.kinds.insert(TaskKind::DirectoryOutputting);
        }
        self.options.output = Some(output);
        self
    }

    /// Saves the task for later; with a date it fires on its own
    pub fn saved(mut self, scheduled_at: Option<DateTime<Utc>>) -> Self {
        self.kinds.insert(TaskKind::Saved);
        self.options.scheduled_at = scheduled_at;
        self
    }

    pub fn follower(mut self, task: Task) -> Self {
        self.followers.push(task);
        self
    }

    pub fn follower_mode(mut self, mode: ExecutionMode) -> Self {
        self.options.follower_mode = mode;
        self
    }

    pub fn build<F>(self, body: F) -> Task
    where
        F: FnOnce(&TaskContext) -> Result<TaskValue, TaskError> + Send + 'static,
    {
        Task {
            inner: Arc::new(TaskInner {
                id: self.id.unwrap_or_else(Uuid::new_v4),
                title: self.title,
                kinds: self.kinds,
                options: self.options,
                body: Mutex::new(Some(Box::new(body))),
                submitted: AtomicBool::new(false),
                claimed: AtomicBool::new(false),
                cancel_requested: AtomicBool::new(false),
                record: Mutex::new(TaskRecord::default()),
                finished: Condvar::new(),
                followers: Mutex::new(self.followers),
            }),
        }
    }
}

/// Handle returned by a successful submission
#[derive(Clone, Debug)]
pub struct TaskHandle {
    task: Task,
    mode: ExecutionMode,
    dispatcher: Weak<Dispatcher>,
}

impl TaskHandle {
    pub(crate) fn new(task: Task, mode: ExecutionMode, dispatcher: Weak<Dispatcher>) -> Self {
        Self {
            task,
            mode,
            dispatcher,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_terminal()
    }

    /// Request cancellation. A parallel task still waiting for a worker is
    /// resolved as cancelled right away.
    pub fn cancel(&self) {
        self.task.request_cancel();
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.purge_cancelled();
        }
    }

    /// Blocks until the terminal state has been published. Must not be called
    /// from the thread that drives an external event pump.
    pub fn wait(&self) -> TaskState {
        self.task.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskState> {
        self.task.wait_timeout(timeout)
    }
}
