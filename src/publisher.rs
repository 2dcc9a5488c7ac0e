//! # State Publisher
//!
//! Every lifecycle transition and submission notice travels through one
//! unbounded channel to a single consumer, the [`EventPump`]. The pump is the
//! only writer of task state, the queued set, the registry removals and the
//! history log, and the only caller of the observer. Producers (workers and
//! the dispatcher) never block on it.

use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Result};
use crate::history::{HistoryEntry, TaskHistory};
use crate::notification::{Notification, NotificationPolicy};
use crate::registry::TaskRegistry;
use crate::task::execution::panic_message;
use crate::task::record::Outcome;
use crate::task::{Task, TaskState};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

/// Events delivered to the subscribed observer
#[derive(Debug, Clone)]
pub enum TaskEvent {
    StateChanged {
        task: Task,
        old_state: TaskState,
        new_state: TaskState,
        at: DateTime<Utc>,
    },
    Notified {
        task: Task,
        notification: Notification,
    },
}

impl TaskEvent {
    pub fn task(&self) -> &Task {
        match self {
            TaskEvent::StateChanged { task, .. } | TaskEvent::Notified { task, .. } => task,
        }
    }
}

/// Receiver of task events. Called on the consumer thread only, one event at
/// a time. Errors and panics are logged and otherwise ignored.
pub trait TaskObserver: Send + Sync {
    fn handle_event(&self, event: &TaskEvent) -> anyhow::Result<()>;
}

/// Holder for the at-most-one subscribed observer
#[derive(Clone, Default)]
pub(crate) struct ObserverSlot {
    inner: Arc<RwLock<Option<Arc<dyn TaskObserver>>>>,
}

impl ObserverSlot {
    pub fn subscribe(&self, observer: Arc<dyn TaskObserver>) -> Result<()> {
        let mut slot = self.inner.write();
        if slot.is_some() {
            return Err(EngineError::ObserverAlreadySubscribed);
        }
        *slot = Some(observer);
        Ok(())
    }

    pub fn unsubscribe(&self) -> bool {
        self.inner.write().take().is_some()
    }

    pub fn current(&self) -> Option<Arc<dyn TaskObserver>> {
        self.inner.read().clone()
    }
}

pub(crate) enum PublisherMessage {
    Notice {
        task: Task,
        notification: Notification,
    },
    Started {
        task: Task,
        at: DateTime<Utc>,
    },
    Finished {
        task: Task,
        at: DateTime<Utc>,
        outcome: Outcome,
    },
    Shutdown,
}

/// Producer side of the publisher channel
#[derive(Clone)]
pub(crate) struct EventSender {
    tx: UnboundedSender<PublisherMessage>,
}

impl EventSender {
    pub fn channel() -> (Self, UnboundedReceiver<PublisherMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn started(&self, task: &Task, at: DateTime<Utc>) {
        self.send(PublisherMessage::Started {
            task: task.clone(),
            at,
        });
    }

    pub fn finished(&self, task: &Task, at: DateTime<Utc>, outcome: Outcome) {
        self.send(PublisherMessage::Finished {
            task: task.clone(),
            at,
            outcome,
        });
    }

    pub fn notice(&self, task: &Task, notification: Notification) {
        self.send(PublisherMessage::Notice {
            task: task.clone(),
            notification,
        });
    }

    pub fn shutdown(&self) {
        self.send(PublisherMessage::Shutdown);
    }

    fn send(&self, message: PublisherMessage) {
        if self.tx.send(message).is_err() {
            debug!("Event pump is gone, dropping event");
        }
    }
}

/// Consumer side of the state publisher.
///
/// With the dedicated consumer mode the engine runs it on its own thread. In
/// external mode the embedder takes it with `Engine::take_event_pump` and
/// drives it from its own loop:
///
/// ```no_run
/// # use taskdeck::{Engine, EngineConfig, ConsumerMode};
/// let config = EngineConfig { consumer: ConsumerMode::External, ..Default::default() };
/// let engine = Engine::new(config)?;
/// let mut pump = engine.take_event_pump().expect("external mode");
/// loop {
///     pump.drain();
///     if pump.is_stopped() { break; }
///     std::thread::sleep(std::time::Duration::from_millis(16));
/// }
/// # Ok::<(), taskdeck::EngineError>(())
/// ```
pub struct EventPump {
    rx: UnboundedReceiver<PublisherMessage>,
    registry: Arc<TaskRegistry>,
    history: Arc<TaskHistory>,
    observer: ObserverSlot,
    dispatcher: Weak<Dispatcher>,
    stopped: bool,
}

impl EventPump {
    pub(crate) fn new(
        rx: UnboundedReceiver<PublisherMessage>,
        registry: Arc<TaskRegistry>,
        history: Arc<TaskHistory>,
        observer: ObserverSlot,
        dispatcher: Weak<Dispatcher>,
    ) -> Self {
        Self {
            rx,
            registry,
            history,
            observer,
            dispatcher,
            stopped: false,
        }
    }

    /// True once the engine has shut down and the final events were handled
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Process every pending event without blocking. Returns how many events
    /// were handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while !self.stopped {
            match self.rx.try_recv() {
                Ok(message) => {
                    self.process(message);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Process events on the current thread until the engine shuts down.
    /// Must not be called from within an async runtime; use [`EventPump::run`].
    pub fn run_blocking(mut self) {
        while !self.stopped {
            match self.rx.blocking_recv() {
                Some(message) => self.process(message),
                None => break,
            }
        }
        debug!("Event pump finished");
    }

    /// Process events on a tokio runtime until the engine shuts down
    pub async fn run(mut self) {
        while !self.stopped {
            match self.rx.recv().await {
                Some(message) => self.process(message),
                None => break,
            }
        }
        debug!("Event pump finished");
    }

    /// Run the pump on a dedicated named thread
    pub(crate) fn spawn(self, name: String) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run_blocking())
    }

    fn process(&mut self, message: PublisherMessage) {
        match message {
            PublisherMessage::Notice { task, notification } => {
                self.deliver(&TaskEvent::Notified { task, notification });
            }
            PublisherMessage::Started { task, at } => self.on_started(task, at),
            PublisherMessage::Finished { task, at, outcome } => {
                self.on_finished(task, at, outcome)
            }
            PublisherMessage::Shutdown => {
                // Events that raced with the shutdown request still get applied
                while let Ok(message) = self.rx.try_recv() {
                    if !matches!(message, PublisherMessage::Shutdown) {
                        self.process(message);
                    }
                }
                self.stopped = true;
                debug!("Event pump received shutdown");
            }
        }
    }

    fn on_started(&self, task: Task, at: DateTime<Utc>) {
        if let Err(err) = task.apply_start(at) {
            warn!("Ignoring start of task {}: {}", task.id(), err);
            return;
        }
        self.registry.unqueue(task.id());
        debug!("Task {} ({}) started", task.id(), task.title());
        self.deliver(&TaskEvent::StateChanged {
            task,
            old_state: TaskState::Pending,
            new_state: TaskState::Running,
            at,
        });
    }

    fn on_finished(&self, task: Task, at: DateTime<Utc>, outcome: Outcome) {
        let old_state = task.state();
        let new_state = outcome.state();
        if let Err(err) = task.apply_finish(at, outcome) {
            warn!("Ignoring completion of task {}: {}", task.id(), err);
            return;
        }

        let unsubmitted = if new_state == TaskState::Succeeded {
            self.submit_followers(&task)
        } else {
            Vec::new()
        };

        self.history.record(HistoryEntry::from_task(&task));
        info!(
            "Task '{}' finished as {} after {:?}",
            task.title(),
            new_state,
            task.duration()
        );

        self.deliver(&TaskEvent::StateChanged {
            task: task.clone(),
            old_state,
            new_state,
            at,
        });

        let silent = task.mode().is_some_and(|mode| mode.is_silent());
        if !silent {
            if let Some(notification) = NotificationPolicy::on_transition(&task, new_state) {
                self.deliver(&TaskEvent::Notified {
                    task: task.clone(),
                    notification,
                });
            }
        }

        self.registry.remove(&task);
        task.mark_published();

        for follower in unsubmitted {
            self.cancel_unsubmitted(follower);
        }
    }

    /// Finish a task that never reached a pool as cancelled
    fn cancel_unsubmitted(&self, task: Task) {
        if task.try_claim() {
            self.on_finished(task, Utc::now(), Outcome::Cancelled);
        }
    }

    /// Submit the followers of a succeeded task. Returns the followers that
    /// could not be submitted and are not running elsewhere.
    fn submit_followers(&self, task: &Task) -> Vec<Task> {
        let followers = task.followers();
        if followers.is_empty() {
            return Vec::new();
        }
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            warn!(
                "Engine is gone, cancelling {} follower(s) of task {}",
                followers.len(),
                task.id()
            );
            return followers;
        };
        let mode = task.follower_mode();
        let mut unsubmitted = Vec::new();
        for follower in followers {
            debug!("Submitting follower {} of task {}", follower.id(), task.id());
            match dispatcher.submit(follower.clone(), mode) {
                Ok(_) => {}
                Err(EngineError::AlreadySubmitted(_)) => {
                    warn!("Follower {} of task {} was already submitted", follower.id(), task.id());
                }
                Err(err) => {
                    warn!(
                        "Failed to submit follower of task {}, cancelling it: {}",
                        task.id(),
                        err
                    );
                    unsubmitted.push(follower);
                }
            }
        }
        unsubmitted
    }

    fn deliver(&self, event: &TaskEvent) {
        let Some(observer) = self.observer.current() else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| observer.handle_event(event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("Observer failed on task {}: {:#}", event.task().id(), err),
            Err(payload) => error!(
                "Observer panicked on task {}: {}",
                event.task().id(),
                panic_message(payload.as_ref())
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskBuilder, TaskKind};
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<TaskEvent>>,
    }

    impl TaskObserver for Recorder {
        fn handle_event(&self, event: &TaskEvent) -> anyhow::Result<()> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    struct Panicking;

    impl TaskObserver for Panicking {
        fn handle_event(&self, _event: &TaskEvent) -> anyhow::Result<()> {
            panic!("observer bug");
        }
    }

    struct Fixture {
        sender: EventSender,
        pump: EventPump,
        registry: Arc<TaskRegistry>,
        history: Arc<TaskHistory>,
        observer: ObserverSlot,
    }

    fn fixture() -> Fixture {
        let (sender, rx) = EventSender::channel();
        let registry = Arc::new(TaskRegistry::new());
        let history = Arc::new(TaskHistory::new());
        let observer = ObserverSlot::default();
        let pump = EventPump::new(
            rx,
            Arc::clone(&registry),
            Arc::clone(&history),
            observer.clone(),
            Weak::new(),
        );
        Fixture {
            sender,
            pump,
            registry,
            history,
            observer,
        }
    }

    fn submitted(fx: &Fixture, title: &str, mode: crate::task::ExecutionMode) -> Task {
        let task = TaskBuilder::new(title)
            .kind(TaskKind::LongRunning)
            .build(|_| Ok(Value::Null));
        assert!(task.mark_submitted(mode));
        fx.registry.insert(task.clone()).unwrap();
        fx.registry.mark_queued(task.clone());
        task
    }

    #[test]
    fn test_pump_applies_lifecycle_in_order() {
        let mut fx = fixture();
        let recorder = Arc::new(Recorder::default());
        fx.observer.subscribe(recorder.clone()).unwrap();

        let task = submitted(&fx, "Convert", crate::task::ExecutionMode::Parallel);
        fx.sender.started(&task, Utc::now());
        fx.sender
            .finished(&task, Utc::now(), Outcome::Succeeded(json!(42)));

        assert_eq!(fx.pump.drain(), 2);
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.result(), Some(json!(42)));
        assert!(fx.registry.is_empty());
        assert_eq!(fx.registry.queued_len(), 0);
        assert_eq!(fx.history.len(), 1);
        assert_eq!(task.wait_timeout(std::time::Duration::ZERO), Some(TaskState::Succeeded));

        let events = recorder.events.lock();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0],
            TaskEvent::StateChanged { new_state: TaskState::Running, .. }
        ));
        assert!(matches!(
            events[1],
            TaskEvent::StateChanged { old_state: TaskState::Running, new_state: TaskState::Succeeded, .. }
        ));
        assert!(matches!(
            &events[2],
            TaskEvent::Notified { notification: Notification::Succeeded { .. }, .. }
        ));
    }

    #[test]
    fn test_invalid_transition_is_ignored() {
        let mut fx = fixture();
        let task = submitted(&fx, "Twice", crate::task::ExecutionMode::Parallel);
        fx.sender.started(&task, Utc::now());
        fx.sender.finished(&task, Utc::now(), Outcome::Cancelled);
        fx.sender
            .finished(&task, Utc::now(), Outcome::Succeeded(Value::Null));
        fx.pump.drain();

        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(task.result().is_none());
        assert_eq!(fx.history.len(), 1);
    }

    #[test]
    fn test_follower_without_engine_is_cancelled() {
        let mut fx = fixture();
        let follower = TaskBuilder::new("Follow-up").build(|_| Ok(Value::Null));
        let parent = TaskBuilder::new("Parent")
            .kind(TaskKind::LongRunning)
            .follower(follower.clone())
            .build(|_| Ok(Value::Null));
        assert!(parent.mark_submitted(crate::task::ExecutionMode::Parallel));
        fx.registry.insert(parent.clone()).unwrap();

        fx.sender.started(&parent, Utc::now());
        fx.sender
            .finished(&parent, Utc::now(), Outcome::Succeeded(Value::Null));
        fx.pump.drain();

        assert_eq!(parent.state(), TaskState::Succeeded);
        assert_eq!(
            follower.wait_timeout(std::time::Duration::ZERO),
            Some(TaskState::Cancelled)
        );
        let titles: Vec<_> = fx
            .history
            .entries()
            .iter()
            .map(|e| (e.title().to_string(), e.final_state()))
            .collect();
        assert_eq!(
            titles,
            vec![
                ("Follow-up".to_string(), TaskState::Cancelled),
                ("Parent".to_string(), TaskState::Succeeded),
            ]
        );
    }

    #[test]
    fn test_silent_task_gets_state_changes_but_no_notification() {
        let mut fx = fixture();
        let recorder = Arc::new(Recorder::default());
        fx.observer.subscribe(recorder.clone()).unwrap();

        let task = submitted(&fx, "Quiet", crate::task::ExecutionMode::Silent);
        fx.sender.started(&task, Utc::now());
        fx.sender
            .finished(&task, Utc::now(), Outcome::Failed(crate::task::TaskError::failed("x")));
        fx.pump.drain();

        let events = recorder.events.lock();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, TaskEvent::StateChanged { .. })));
    }

    #[test]
    fn test_observer_panic_is_contained() {
        let mut fx = fixture();
        fx.observer.subscribe(Arc::new(Panicking)).unwrap();

        let task = submitted(&fx, "Survives", crate::task::ExecutionMode::Parallel);
        fx.sender.started(&task, Utc::now());
        fx.sender
            .finished(&task, Utc::now(), Outcome::Succeeded(Value::Null));
        assert_eq!(fx.pump.drain(), 2);
        assert_eq!(task.state(), TaskState::Succeeded);
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_single_observer_slot() {
        let slot = ObserverSlot::default();
        slot.subscribe(Arc::new(Recorder::default())).unwrap();
        assert!(matches!(
            slot.subscribe(Arc::new(Recorder::default())),
            Err(EngineError::ObserverAlreadySubscribed)
        ));
        assert!(slot.unsubscribe());
        assert!(!slot.unsubscribe());
        assert!(slot.subscribe(Arc::new(Recorder::default())).is_ok());
    }

    #[test]
    fn test_shutdown_stops_pump_after_pending_events() {
        let mut fx = fixture();
        let task = submitted(&fx, "Last", crate::task::ExecutionMode::Parallel);
        fx.sender.shutdown();
        fx.sender.finished(&task, Utc::now(), Outcome::Cancelled);

        fx.pump.drain();
        assert!(fx.pump.is_stopped());
        assert_eq!(task.state(), TaskState::Cancelled);
        assert_eq!(fx.pump.drain(), 0);
    }

    #[tokio::test]
    async fn test_async_run_until_shutdown() {
        let fx = fixture();
        let task = submitted(&fx, "Async", crate::task::ExecutionMode::Parallel);
        fx.sender.started(&task, Utc::now());
        fx.sender
            .finished(&task, Utc::now(), Outcome::Succeeded(Value::Null));
        fx.sender.shutdown();

        fx.pump.run().await;
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(fx.history.len(), 1);
    }
}
