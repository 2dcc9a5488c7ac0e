use crate::config::EngineConfig;
use crate::deferred::DeferredStore;
use crate::error::{EngineError, Result};
use crate::notification::{NotificationPolicy, Occupancy};
use crate::pool::{PoolJob, PoolStats, ThreadPool};
use crate::publisher::EventSender;
use crate::registry::TaskRegistry;
use crate::task::execution::{execute, resolve_cancelled};
use crate::task::record::Outcome;
use crate::task::{ExecutionMode, Task, TaskHandle, TaskId, TaskValue};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Routes submissions to the pools and keeps the registry and queued set in
/// step with them.
pub(crate) struct Dispatcher {
    fixed: ThreadPool,
    elastic: ThreadPool,
    sequential: ThreadPool,
    registry: Arc<TaskRegistry>,
    deferred: DeferredStore,
    events: EventSender,
    /// Result of the most recent task of the sequential chain
    chain: Arc<Mutex<Option<TaskValue>>>,
    accepting: AtomicBool,
    weak_self: Weak<Dispatcher>,
}

impl Dispatcher {
    pub fn new(config: &EngineConfig, registry: Arc<TaskRegistry>, events: EventSender) -> Arc<Self> {
        let prefix = config.thread_name_prefix.as_str();
        Arc::new_cyclic(|weak_self| Self {
            fixed: ThreadPool::fixed(config.max_parallel_tasks, prefix),
            elastic: ThreadPool::elastic(
                config.elastic_max_workers,
                config.elastic_idle_timeout(),
                prefix,
            ),
            sequential: ThreadPool::sequential(prefix),
            registry,
            deferred: DeferredStore::new(weak_self.clone(), prefix),
            events,
            chain: Arc::new(Mutex::new(None)),
            accepting: AtomicBool::new(true),
            weak_self: weak_self.clone(),
        })
    }

    /// Accept a task for execution. Registration and queued-set insertion are
    /// complete when this returns; it never waits on running work.
    pub fn submit(&self, task: Task, mode: ExecutionMode) -> Result<TaskHandle> {
        if !self.is_accepting() {
            return Err(EngineError::ShuttingDown);
        }

        if task.is_deferred() {
            return self.park(task, mode);
        }

        if self.deferred.contains(task.id()) {
            return Err(EngineError::DuplicateTask(task.id()));
        }
        self.registry.insert(task.clone())?;
        if !task.mark_submitted(mode) {
            self.registry.remove(&task);
            return Err(EngineError::AlreadySubmitted(task.id()));
        }

        if let Some(notification) = NotificationPolicy::on_submit(&task, mode, &self.occupancy()) {
            self.events.notice(&task, notification);
        }

        self.enqueue(&task, mode)?;
        debug!("Submitted task {} ({}) as {:?}", task.id(), task.title(), mode);
        Ok(TaskHandle::new(task, mode, self.weak_self.clone()))
    }

    /// Move a parked task into its pool. A task that cannot be released
    /// finishes as cancelled so its waiters are not left hanging.
    pub fn release(&self, task: Task, mode: ExecutionMode) -> Result<TaskHandle> {
        let released = if self.is_accepting() {
            self.registry
                .insert(task.clone())
                .and_then(|()| {
                    task.set_mode(mode);
                    self.enqueue(&task, mode)
                })
        } else {
            Err(EngineError::ShuttingDown)
        };

        if let Err(err) = released {
            resolve_cancelled(&task, &self.events);
            return Err(err);
        }
        info!("Released deferred task '{}'", task.title());
        Ok(TaskHandle::new(task, mode, self.weak_self.clone()))
    }

    /// Release a saved task on demand
    pub fn trigger(&self, id: TaskId) -> Result<TaskHandle> {
        let (task, mode) = self
            .deferred
            .take(id)
            .ok_or(EngineError::UnknownDeferredTask(id))?;
        self.release(task, mode)
    }

    pub fn deferred(&self) -> &DeferredStore {
        &self.deferred
    }

    fn park(&self, task: Task, mode: ExecutionMode) -> Result<TaskHandle> {
        if self.registry.contains(task.id()) {
            return Err(EngineError::DuplicateTask(task.id()));
        }
        self.deferred.park(task.clone(), mode)?;
        if !task.mark_submitted(mode) {
            self.deferred.take(task.id());
            return Err(EngineError::AlreadySubmitted(task.id()));
        }
        if let Some(notification) = NotificationPolicy::on_submit(&task, mode, &self.occupancy()) {
            self.events.notice(&task, notification);
        }
        Ok(TaskHandle::new(task, mode, self.weak_self.clone()))
    }

    /// Hand a registered task to its pool. Long-running work always goes to
    /// the fixed pool, even when the task is also marked short-running.
    ///
    /// A task the pool refuses is resolved as cancelled, so a submission
    /// notice already sent is followed by a terminal transition.
    fn enqueue(&self, task: &Task, mode: ExecutionMode) -> Result<()> {
        self.registry.mark_queued(task.clone());
        let (pool, job) = if mode.is_sequential() {
            (&self.sequential, self.sequential_job(task.clone()))
        } else if task.is_long_running() || !task.is_short_running() {
            (&self.fixed, self.parallel_job(task.clone()))
        } else {
            (&self.elastic, self.parallel_job(task.clone()))
        };

        if let Err(err) = pool.submit(job) {
            self.registry.remove(task);
            resolve_cancelled(task, &self.events);
            return Err(err);
        }
        Ok(())
    }

    fn parallel_job(&self, task: Task) -> PoolJob {
        let dispatcher = self.weak_self.clone();
        let events = self.events.clone();
        PoolJob::new(task.clone(), move || {
            execute(&task, None, dispatcher, &events);
        })
    }

    fn sequential_job(&self, task: Task) -> PoolJob {
        let dispatcher = self.weak_self.clone();
        let events = self.events.clone();
        let chain = Arc::clone(&self.chain);
        PoolJob::new(task.clone(), move || {
            let previous = chain.lock().take();
            let outcome = execute(&task, previous, dispatcher, &events);
            // A failed or cancelled link leaves the next task without input
            *chain.lock() = match outcome {
                Some(Outcome::Succeeded(value)) => Some(value),
                _ => None,
            };
        })
    }

    /// Resolve queued, cancelled parallel tasks without running them.
    /// Sequential tasks are resolved in order by the sequential worker.
    pub fn purge_cancelled(&self) -> usize {
        let mut resolved = 0;
        for pool in [&self.fixed, &self.elastic] {
            for task in pool.purge_cancelled() {
                if resolve_cancelled(&task, &self.events) {
                    resolved += 1;
                }
            }
        }
        if resolved > 0 {
            debug!("Resolved {} queued task(s) as cancelled", resolved);
        }
        resolved
    }

    pub fn occupancy(&self) -> Occupancy {
        Occupancy {
            fixed: self.fixed.stats(),
            sequential: self.sequential.stats(),
        }
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        vec![
            self.fixed.stats(),
            self.elastic.stats(),
            self.sequential.stats(),
        ]
    }

    /// True if a fixed or elastic worker is executing a task
    pub fn is_any_running(&self) -> bool {
        self.fixed.active_count() + self.elastic.active_count() > 0
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting work. Idempotent.
    pub fn stop_accepting(&self) -> bool {
        self.accepting.swap(false, Ordering::SeqCst)
    }

    /// Release a parked task without running it; it finishes as cancelled
    pub fn discard(&self, id: TaskId) -> Result<Task> {
        let (task, _) = self
            .deferred
            .take(id)
            .ok_or(EngineError::UnknownDeferredTask(id))?;
        resolve_cancelled(&task, &self.events);
        Ok(task)
    }

    /// Ask every thread to wind down without waiting for any of them
    pub fn signal_stop(&self) {
        self.stop_accepting();
        self.drop_deferred();
        for pool in [&self.fixed, &self.elastic, &self.sequential] {
            pool.begin_shutdown();
        }
    }

    fn drop_deferred(&self) {
        for task in self.deferred.shutdown() {
            info!("Dropping deferred task '{}' at shutdown", task.title());
            resolve_cancelled(&task, &self.events);
        }
    }

    /// Stop accepting work, let the pools drain, then cancel whatever is left
    /// after the grace period. Returns true if every worker terminated.
    pub fn shutdown(&self, grace: Duration) -> bool {
        self.signal_stop();

        if self.await_pools(grace) {
            return true;
        }

        warn!(
            "Workers still busy after {:?}, requesting cancellation of {} task(s)",
            grace,
            self.registry.len()
        );
        self.registry.request_cancel_all();
        self.purge_cancelled();

        let terminated = self.await_pools(grace);
        if !terminated {
            warn!("Some workers did not terminate; leaving them detached");
        }
        terminated
    }

    fn await_pools(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        [&self.fixed, &self.elastic, &self.sequential]
            .into_iter()
            .fold(true, |all, pool| {
                let remaining = deadline.saturating_duration_since(Instant::now());
                pool.await_termination(remaining) && all
            })
    }
}
