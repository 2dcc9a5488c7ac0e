use crate::error::{EngineError, Result};
use crate::task::{Task, TaskId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Authoritative set of active tasks plus the queued subset.
///
/// Entries are added by the dispatcher at submission and removed exactly once
/// by the state publisher at the terminal notification. Iteration is safe while
/// other threads add or remove entries.
pub struct TaskRegistry {
    tasks: DashMap<TaskId, Task>,
    queued: Mutex<VecDeque<Task>>,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            queued: Mutex::new(VecDeque::new()),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
        }
    }

    /// Register a task, rejecting an id that is already present
    pub fn insert(&self, task: Task) -> Result<()> {
        match self.tasks.entry(task.id()) {
            Entry::Occupied(entry) => Err(EngineError::DuplicateTask(*entry.key())),
            Entry::Vacant(entry) => {
                entry.insert(task);
                Ok(())
            }
        }
    }

    /// Remove this exact task. A different task registered under the same id
    /// is left alone. Only the first call returns true.
    pub fn remove(&self, task: &Task) -> bool {
        let id = task.id();
        let removed = self.tasks.remove_if(&id, |_, registered| registered == task).is_some();
        if removed {
            self.unqueue(id);
            let _guard = self.idle_lock.lock();
            if self.tasks.is_empty() {
                debug!("Task registry drained");
                self.idle.notify_all();
            }
        }
        removed
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshot of the active tasks
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Request cancellation of every registered task; returns how many were asked
    pub fn request_cancel_all(&self) -> usize {
        let mut count = 0;
        for entry in self.tasks.iter() {
            entry.value().request_cancel();
            count += 1;
        }
        count
    }

    pub fn mark_queued(&self, task: Task) {
        self.queued.lock().push_back(task);
    }

    /// Drop a task from the queued set; false if it was not queued
    pub fn unqueue(&self, id: TaskId) -> bool {
        let mut queued = self.queued.lock();
        let before = queued.len();
        queued.retain(|task| task.id() != id);
        queued.len() != before
    }

    /// Queued tasks in submission order
    pub fn queued(&self) -> Vec<Task> {
        self.queued.lock().iter().cloned().collect()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.lock().len()
    }

    /// Block until no task is registered. Returns false on timeout.
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.idle_lock.lock();
        while !self.tasks.is_empty() {
            if self.idle.wait_until(&mut guard, deadline).timed_out() {
                return self.tasks.is_empty();
            }
        }
        true
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
