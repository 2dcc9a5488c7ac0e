//! Engine facade tying the pools, registry, publisher and history together.

use crate::config::{ConsumerMode, EngineConfig};
use crate::deferred::DeferredTaskInfo;
use crate::dispatcher::Dispatcher;
use crate::env;
use crate::error::{EngineError, Result};
use crate::history::{HistoryEntry, TaskHistory};
use crate::pool::PoolStats;
use crate::publisher::{EventPump, EventSender, ObserverSlot, TaskObserver};
use crate::registry::TaskRegistry;
use crate::task::{ExecutionMode, Task, TaskHandle, TaskId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// Task execution engine.
///
/// Construct one per application and pass it by reference. Dropping an engine
/// that was not shut down asks every worker to stop without waiting.
pub struct Engine {
    config: EngineConfig,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<TaskRegistry>,
    history: Arc<TaskHistory>,
    observer: ObserverSlot,
    events: EventSender,
    pump: Mutex<Option<EventPump>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

/// Snapshot of the engine's occupancy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub pools: Vec<PoolStats>,
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub deferred_tasks: usize,
    pub finished_tasks: usize,
    pub accepting: bool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let (events, rx) = EventSender::channel();
        let registry = Arc::new(TaskRegistry::new());
        let history = Arc::new(TaskHistory::new());
        let observer = ObserverSlot::default();
        let dispatcher = Dispatcher::new(&config, Arc::clone(&registry), events.clone());
        let pump = EventPump::new(
            rx,
            Arc::clone(&registry),
            Arc::clone(&history),
            observer.clone(),
            Arc::downgrade(&dispatcher),
        );

        let (pump, consumer) = match config.consumer {
            ConsumerMode::Dedicated => {
                let name = env::consumer_thread_name(&config.thread_name_prefix);
                let handle = pump
                    .spawn(name.clone())
                    .map_err(|source| EngineError::ThreadSpawn { name, source })?;
                (None, Some(handle))
            }
            ConsumerMode::External => (Some(pump), None),
        };

        info!(
            "Engine started: {} fixed worker(s), up to {} elastic worker(s), {:?} consumer",
            config.max_parallel_tasks, config.elastic_max_workers, config.consumer
        );

        Ok(Self {
            config,
            dispatcher,
            registry,
            history,
            observer,
            events,
            pump: Mutex::new(pump),
            consumer: Mutex::new(consumer),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ============================================================================
    // Submission
    // ============================================================================

    /// Submit a task in the given mode
    pub fn submit(&self, task: Task, mode: ExecutionMode) -> Result<TaskHandle> {
        self.dispatcher.submit(task, mode)
    }

    pub fn run_in_parallel(&self, task: Task) -> Result<TaskHandle> {
        self.submit(task, ExecutionMode::Parallel)
    }

    pub fn run_sequentially(&self, task: Task) -> Result<TaskHandle> {
        self.submit(task, ExecutionMode::Sequential)
    }

    /// Append tasks to the sequential chain in order. Stops at the first
    /// rejected task; the ones before it stay submitted.
    pub fn run_all_sequentially<I>(&self, tasks: I) -> Result<Vec<TaskHandle>>
    where
        I: IntoIterator<Item = Task>,
    {
        tasks
            .into_iter()
            .map(|task| self.run_sequentially(task))
            .collect()
    }

    /// Submit without any user-facing notification
    pub fn run_silently(&self, task: Task, sequential: bool) -> Result<TaskHandle> {
        let mode = if sequential {
            ExecutionMode::SilentSequential
        } else {
            ExecutionMode::Silent
        };
        self.submit(task, mode)
    }

    // ============================================================================
    // Cancellation
    // ============================================================================

    /// Request cancellation of every active task. Queued parallel tasks are
    /// resolved immediately; running ones stop when their body notices.
    pub fn cancel_all(&self) -> usize {
        let requested = self.registry.request_cancel_all();
        self.dispatcher.purge_cancelled();
        if requested > 0 {
            info!("Requested cancellation of {} task(s)", requested);
        }
        requested
    }

    /// Request cancellation of one active task; false if it is not active
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.registry.get(id) {
            Some(task) => {
                task.request_cancel();
                self.dispatcher.purge_cancelled();
                true
            }
            None => false,
        }
    }

    // ============================================================================
    // Observation
    // ============================================================================

    /// Subscribe the single observer
    pub fn subscribe(&self, observer: Arc<dyn TaskObserver>) -> Result<()> {
        self.observer.subscribe(observer)
    }

    pub fn unsubscribe(&self) -> bool {
        self.observer.unsubscribe()
    }

    /// Hand out the event pump. Only available once, in external consumer mode.
    pub fn take_event_pump(&self) -> Option<EventPump> {
        self.pump.lock().take()
    }

    /// True while a fixed or elastic worker executes a task
    pub fn is_any_running(&self) -> bool {
        self.dispatcher.is_any_running()
    }

    /// Terminal outcomes, most recent first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.entries()
    }

    pub fn export_history_json(&self) -> serde_json::Result<String> {
        self.history.export_to_json()
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.registry.get(id)
    }

    /// Tasks submitted and not yet finished
    pub fn active_tasks(&self) -> Vec<Task> {
        self.registry.tasks()
    }

    /// Tasks waiting for a worker, in submission order
    pub fn queued_tasks(&self) -> Vec<Task> {
        self.registry.queued()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            pools: self.dispatcher.pool_stats(),
            active_tasks: self.registry.len(),
            queued_tasks: self.registry.queued_len(),
            deferred_tasks: self.dispatcher.deferred().len(),
            finished_tasks: self.history.len(),
            accepting: self.dispatcher.is_accepting(),
        }
    }

    /// Block until no task is active. In external consumer mode the pump has
    /// to be driven on another thread meanwhile.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        self.registry.wait_until_empty(timeout)
    }

    // ============================================================================
    // Deferred tasks
    // ============================================================================

    /// Saved and scheduled tasks waiting to be released
    pub fn deferred_tasks(&self) -> Vec<DeferredTaskInfo> {
        self.dispatcher.deferred().list()
    }

    pub fn trigger_deferred(&self, id: TaskId) -> Result<TaskHandle> {
        self.dispatcher.trigger(id)
    }

    /// Drop a parked task; it finishes as cancelled without running
    pub fn discard_deferred(&self, id: TaskId) -> Result<Task> {
        self.dispatcher.discard(id)
    }

    // ============================================================================
    // Shutdown
    // ============================================================================

    /// Graceful shutdown: stop accepting, let queued work drain for the grace
    /// period, cancel the rest, then stop the consumer. Returns true if every
    /// worker terminated. Calling it again is a no-op.
    pub fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return true;
        }
        info!("Shutting down engine...");

        let terminated = self.dispatcher.shutdown(self.config.shutdown_grace());
        self.events.shutdown();

        if let Some(handle) = self.consumer.lock().take() {
            if handle.thread().id() == thread::current().id() {
                warn!("Shutdown called from the consumer thread; not joining it");
            } else if handle.join().is_err() {
                warn!("Event consumer thread exited abnormally");
            }
        }

        info!("Engine shutdown complete");
        terminated
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.request_cancel_all();
        self.dispatcher.signal_stop();
        self.events.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskBuilder, TaskKind, TaskState};
    use serde_json::Value;

    fn config(consumer: ConsumerMode) -> EngineConfig {
        EngineConfig {
            max_parallel_tasks: 2,
            thread_name_prefix: "engine-test".to_string(),
            shutdown_grace_secs: 5,
            consumer,
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            max_parallel_tasks: 0,
            ..Default::default()
        };
        assert!(matches!(
            Engine::new(config),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_event_pump_only_in_external_mode() {
        let dedicated = Engine::new(config(ConsumerMode::Dedicated)).unwrap();
        assert!(dedicated.take_event_pump().is_none());
        assert!(dedicated.shutdown());

        let external = Engine::new(config(ConsumerMode::External)).unwrap();
        assert!(external.take_event_pump().is_some());
        assert!(external.take_event_pump().is_none());
        assert!(external.shutdown());
    }

    #[test]
    fn test_status_counts() {
        let engine = Engine::new(config(ConsumerMode::Dedicated)).unwrap();
        let saved = TaskBuilder::new("saved").saved(None).build(|_| Ok(Value::Null));
        engine.run_in_parallel(saved).unwrap();
        let handle = engine
            .run_in_parallel(Task::new("quick", TaskKind::ShortRunning, |_| Ok(Value::Null)))
            .unwrap();
        assert_eq!(handle.wait_timeout(Duration::from_secs(5)), Some(TaskState::Succeeded));

        let status = engine.status();
        assert_eq!(status.deferred_tasks, 1);
        assert_eq!(status.finished_tasks, 1);
        assert_eq!(status.active_tasks, 0);
        assert_eq!(status.pools.len(), 3);
        assert!(status.accepting);

        assert!(engine.shutdown());
        assert!(!engine.status().accepting);
        assert_eq!(engine.status().deferred_tasks, 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let engine = Engine::new(config(ConsumerMode::Dedicated)).unwrap();
        assert!(engine.shutdown());
        assert!(engine.shutdown());
        let late = Task::new("late", TaskKind::LongRunning, |_| Ok(Value::Null));
        assert!(matches!(
            engine.run_in_parallel(late),
            Err(EngineError::ShuttingDown)
        ));
    }
}
