use super::PoolKind;
use crate::error::{EngineError, Result};
use crate::task::Task;
use crate::task::execution::panic_message;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Queued unit of pool work: the task it belongs to and the closure that
/// drives it.
pub struct PoolJob {
    task: Task,
    run: Box<dyn FnOnce() + Send + 'static>,
}

impl PoolJob {
    pub fn new(task: Task, run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            task,
            run: Box::new(run),
        }
    }
}

/// Point-in-time occupancy of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub kind: PoolKind,
    pub workers: usize,
    pub active: usize,
    pub idle: usize,
    pub queued: usize,
    pub max_workers: usize,
}

impl PoolStats {
    /// Jobs either running or waiting for a worker
    pub fn busy(&self) -> usize {
        self.active + self.queued
    }

    /// True if a newly submitted job would start without waiting
    pub fn has_free_worker(&self) -> bool {
        self.busy() < self.max_workers
    }
}

/// Worker pool backed by named OS threads
pub struct ThreadPool {
    shared: Arc<Shared>,
}

struct Shared {
    kind: PoolKind,
    thread_name: String,
    max_workers: usize,
    keep_alive: Option<Duration>,
    state: Mutex<PoolState>,
    work_available: Condvar,
    terminated: Condvar,
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<PoolJob>,
    workers: usize,
    idle: usize,
    active: usize,
    shutdown: bool,
    next_worker_id: usize,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(
        kind: PoolKind,
        max_workers: usize,
        keep_alive: Option<Duration>,
        thread_prefix: &str,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                kind,
                thread_name: format!("{}-{}", thread_prefix, kind),
                max_workers: max_workers.max(1),
                keep_alive,
                state: Mutex::new(PoolState::default()),
                work_available: Condvar::new(),
                terminated: Condvar::new(),
            }),
        }
    }

    /// Bounded pool whose workers never retire
    pub fn fixed(workers: usize, thread_prefix: &str) -> Self {
        Self::new(PoolKind::Fixed, workers, None, thread_prefix)
    }

    /// Pool that grows up to `max_workers` and retires workers idle for `keep_alive`
    pub fn elastic(max_workers: usize, keep_alive: Duration, thread_prefix: &str) -> Self {
        Self::new(PoolKind::Elastic, max_workers, Some(keep_alive), thread_prefix)
    }

    /// Single-worker pool
    pub fn sequential(thread_prefix: &str) -> Self {
        Self::new(PoolKind::Sequential, 1, None, thread_prefix)
    }

    /// Enqueue a job, spawning a worker if none is free and the cap allows it.
    /// Never blocks on running jobs.
    pub fn submit(&self, job: PoolJob) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(EngineError::ShuttingDown);
        }

        state.queue.push_back(job);

        if state.queue.len() > state.idle && state.workers < self.shared.max_workers {
            if let Err(source) = self.spawn_worker(&mut state) {
                if state.workers == 0 {
                    state.queue.pop_back();
                    return Err(EngineError::WorkerSpawn {
                        pool: self.shared.kind,
                        source,
                    });
                }
                warn!(
                    "Could not grow {} pool beyond {} workers: {}",
                    self.shared.kind, state.workers, source
                );
            }
        }

        drop(state);
        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Remove queued jobs whose task has been asked to cancel, returning their
    /// tasks. Removed jobs never reach a worker.
    pub fn purge_cancelled(&self) -> Vec<Task> {
        let mut state = self.shared.state.lock();
        let mut purged = Vec::new();
        state.queue.retain(|job| {
            if job.task.is_cancel_requested() {
                purged.push(job.task.clone());
                false
            } else {
                true
            }
        });
        if !purged.is_empty() {
            debug!(
                "Purged {} cancelled jobs from {} pool",
                purged.len(),
                self.shared.kind
            );
        }
        purged
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            kind: self.shared.kind,
            workers: state.workers,
            active: state.active,
            idle: state.idle,
            queued: state.queue.len(),
            max_workers: self.shared.max_workers,
        }
    }

    pub fn active_count(&self) -> usize {
        self.shared.state.lock().active
    }

    /// Stop accepting jobs. Workers finish what is queued, then exit.
    pub fn begin_shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        drop(state);
        self.shared.work_available.notify_all();
        debug!("{} pool shutting down", self.shared.kind);
    }

    /// Wait until every worker has exited or the timeout elapses.
    /// Returns true if the pool terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.workers > 0 {
            if self
                .shared
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        let terminated = state.workers == 0;
        let handles = std::mem::take(&mut state.handles);
        drop(state);

        for handle in handles {
            // Workers stuck in a task body are left detached
            if terminated || handle.is_finished() {
                if handle.join().is_err() {
                    error!("{} pool worker exited abnormally", self.shared.kind);
                }
            }
        }
        terminated
    }

    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.begin_shutdown();
        self.await_termination(timeout)
    }

    fn spawn_worker(&self, state: &mut PoolState) -> std::io::Result<()> {
        let id = state.next_worker_id;
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.shared.thread_name, id))
            .spawn(move || worker_loop(shared))?;

        state.next_worker_id += 1;
        state.workers += 1;
        state.handles.retain(|h| !h.is_finished());
        state.handles.push(handle);
        debug!(
            "Spawned {} worker {} ({} total)",
            self.shared.kind, id, state.workers
        );
        Ok(())
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    state.active += 1;
                    break job;
                }
                if state.shutdown {
                    retire(&shared, &mut state);
                    return;
                }

                state.idle += 1;
                let timed_out = match shared.keep_alive {
                    Some(keep_alive) => shared
                        .work_available
                        .wait_for(&mut state, keep_alive)
                        .timed_out(),
                    None => {
                        shared.work_available.wait(&mut state);
                        false
                    }
                };
                state.idle -= 1;

                if timed_out && state.queue.is_empty() && !state.shutdown {
                    debug!("Retiring idle {} worker", shared.kind);
                    retire(&shared, &mut state);
                    return;
                }
            }
        };

        let task_id = job.task.id();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(job.run)) {
            error!(
                "{} pool job for task {} panicked: {}",
                shared.kind,
                task_id,
                panic_message(payload.as_ref())
            );
        }

        shared.state.lock().active -= 1;
    }
}

fn retire(shared: &Shared, state: &mut PoolState) {
    state.workers -= 1;
    if state.workers == 0 {
        shared.terminated.notify_all();
    }
}
