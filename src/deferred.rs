use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Result};
use crate::task::{ExecutionMode, Task, TaskId};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Serializable description of a parked task, for external persistence
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeferredTaskInfo {
    pub id: TaskId,
    pub title: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub mode: ExecutionMode,
    pub parked_at: DateTime<Utc>,
}

struct Parked {
    task: Task,
    mode: ExecutionMode,
    parked_at: DateTime<Utc>,
}

impl Parked {
    fn info(&self) -> DeferredTaskInfo {
        DeferredTaskInfo {
            id: self.task.id(),
            title: self.task.title().to_string(),
            scheduled_at: self.task.scheduled_at(),
            mode: self.mode,
            parked_at: self.parked_at,
        }
    }
}

#[derive(Default)]
struct StoreState {
    parked: HashMap<TaskId, Parked>,
    shutdown: bool,
}

struct StoreShared {
    state: Mutex<StoreState>,
    wake: Condvar,
}

/// Saved and scheduled tasks waiting outside the pools.
///
/// Saved tasks wait for an explicit trigger. Scheduled tasks are released by a
/// scheduler thread, spawned on the first dated park, once their date passes.
pub(crate) struct DeferredStore {
    shared: Arc<StoreShared>,
    dispatcher: Weak<Dispatcher>,
    thread_name: String,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl DeferredStore {
    pub fn new(dispatcher: Weak<Dispatcher>, thread_prefix: &str) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                state: Mutex::new(StoreState::default()),
                wake: Condvar::new(),
            }),
            dispatcher,
            thread_name: format!("{}-scheduler", thread_prefix),
            scheduler: Mutex::new(None),
        }
    }

    pub fn park(&self, task: Task, mode: ExecutionMode) -> Result<()> {
        let dated = task.scheduled_at().is_some();
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return Err(EngineError::ShuttingDown);
            }
            if state.parked.contains_key(&task.id()) {
                return Err(EngineError::DuplicateTask(task.id()));
            }
            info!(
                "Parked task '{}' ({})",
                task.title(),
                match task.scheduled_at() {
                    Some(at) => format!("scheduled for {}", at),
                    None => "saved".to_string(),
                }
            );
            state.parked.insert(
                task.id(),
                Parked {
                    task,
                    mode,
                    parked_at: Utc::now(),
                },
            );
        }

        if dated {
            self.ensure_scheduler()?;
            self.shared.wake.notify_all();
        }
        Ok(())
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.shared.state.lock().parked.contains_key(&id)
    }

    /// Remove a parked task, returning it with the mode it was submitted in
    pub fn take(&self, id: TaskId) -> Option<(Task, ExecutionMode)> {
        let removed = self.shared.state.lock().parked.remove(&id);
        if removed.is_some() {
            self.shared.wake.notify_all();
        }
        removed.map(|parked| (parked.task, parked.mode))
    }

    /// Parked tasks, oldest first
    pub fn list(&self) -> Vec<DeferredTaskInfo> {
        let state = self.shared.state.lock();
        let mut infos: Vec<_> = state.parked.values().map(Parked::info).collect();
        infos.sort_by_key(|info| info.parked_at);
        infos
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().parked.len()
    }

    /// Stop the scheduler and hand back every task still parked
    pub fn shutdown(&self) -> Vec<Task> {
        let remaining = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state
                .parked
                .drain()
                .map(|(_, parked)| parked.task)
                .collect::<Vec<_>>()
        };
        self.shared.wake.notify_all();

        if let Some(handle) = self.scheduler.lock().take() {
            if handle.join().is_err() {
                warn!("Deferred task scheduler exited abnormally");
            }
        }
        remaining
    }

    fn ensure_scheduler(&self) -> Result<()> {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let dispatcher = self.dispatcher.clone();
        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || scheduler_loop(shared, dispatcher))
            .map_err(|source| EngineError::ThreadSpawn {
                name: self.thread_name.clone(),
                source,
            })?;
        debug!("Started deferred task scheduler");
        *scheduler = Some(handle);
        Ok(())
    }
}

fn scheduler_loop(shared: Arc<StoreShared>, dispatcher: Weak<Dispatcher>) {
    loop {
        let due = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                let next = state
                    .parked
                    .values()
                    .filter_map(|p| p.task.scheduled_at().map(|at| (p.task.id(), at)))
                    .min_by_key(|(_, at)| *at);

                match next {
                    None => shared.wake.wait(&mut state),
                    Some((id, at)) => {
                        let now = Utc::now();
                        if at <= now {
                            break state.parked.remove(&id);
                        }
                        let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
                        shared.wake.wait_for(&mut state, wait);
                    }
                }
            }
        };

        let Some(parked) = due else { continue };
        let Some(dispatcher) = dispatcher.upgrade() else {
            return;
        };
        info!("Scheduled task '{}' is due", parked.task.title());
        if let Err(err) = dispatcher.release(parked.task, parked.mode) {
            warn!("Failed to release scheduled task: {}", err);
        }
    }
}

impl Drop for DeferredStore {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskBuilder;
    use serde_json::Value;
    use std::time::Instant;

    fn saved(title: &str, at: Option<DateTime<Utc>>) -> Task {
        TaskBuilder::new(title).saved(at).build(|_| Ok(Value::Null))
    }

    #[test]
    fn test_park_list_take() {
        let store = DeferredStore::new(Weak::new(), "test");
        let first = saved("first", None);
        let second = saved("second", None);
        store.park(first.clone(), ExecutionMode::Parallel).unwrap();
        store.park(second.clone(), ExecutionMode::Sequential).unwrap();

        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].title, "first");
        assert_eq!(listed[1].mode, ExecutionMode::Sequential);

        assert!(matches!(
            store.park(first.clone(), ExecutionMode::Parallel),
            Err(EngineError::DuplicateTask(id)) if id == first.id()
        ));

        let (task, mode) = store.take(second.id()).unwrap();
        assert_eq!(task.id(), second.id());
        assert_eq!(mode, ExecutionMode::Sequential);
        assert!(store.take(second.id()).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_due_task_leaves_store() {
        let store = DeferredStore::new(Weak::new(), "test");
        let due = saved("due", Some(Utc::now() - chrono::Duration::seconds(1)));
        let later = saved("later", Some(Utc::now() + chrono::Duration::hours(1)));
        store.park(later.clone(), ExecutionMode::Parallel).unwrap();
        store.park(due.clone(), ExecutionMode::Parallel).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.contains(due.id()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!store.contains(due.id()));
        assert!(store.contains(later.id()));
    }

    #[test]
    fn test_shutdown_returns_remaining_and_rejects_new() {
        let store = DeferredStore::new(Weak::new(), "test");
        store
            .park(saved("kept", Some(Utc::now() + chrono::Duration::hours(1))), ExecutionMode::Parallel)
            .unwrap();

        let remaining = store.shutdown();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title(), "kept");
        assert!(matches!(
            store.park(saved("late", None), ExecutionMode::Parallel),
            Err(EngineError::ShuttingDown)
        ));
    }
}
