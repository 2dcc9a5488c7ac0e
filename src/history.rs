use crate::task::{Task, TaskId, TaskState};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Immutable record of a task that reached a terminal state
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    task_id: TaskId,
    title: String,
    duration_ms: u64,
    final_state: TaskState,
    finished_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub(crate) fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id(),
            title: task.title().to_string(),
            duration_ms: task.duration().as_millis() as u64,
            final_state: task.state(),
            finished_at: task.ended_at().unwrap_or_else(Utc::now),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn final_state(&self) -> TaskState {
        self.final_state
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }
}

/// Ordered log of terminal outcomes, most recent first. Unbounded; retention
/// is left to whoever renders it.
#[derive(Default)]
pub struct TaskHistory {
    entries: RwLock<VecDeque<HistoryEntry>>,
}

impl TaskHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, entry: HistoryEntry) {
        self.entries.write().push_front(entry);
    }

    /// Snapshot of the log, most recent first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<HistoryEntry> {
        self.entries.read().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Export the log as pretty JSON
    pub fn export_to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.entries.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, state: TaskState) -> HistoryEntry {
        HistoryEntry {
            task_id: uuid::Uuid::new_v4(),
            title: title.to_string(),
            duration_ms: 1500,
            final_state: state,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_most_recent_first() {
        let history = TaskHistory::new();
        history.record(entry("first", TaskState::Succeeded));
        history.record(entry("second", TaskState::Failed));
        history.record(entry("third", TaskState::Cancelled));

        let titles: Vec<_> = history
            .entries()
            .iter()
            .map(|e| e.title().to_string())
            .collect();
        assert_eq!(titles, vec!["third", "second", "first"]);
        assert_eq!(history.latest().unwrap().final_state(), TaskState::Cancelled);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_export_to_json() {
        let history = TaskHistory::new();
        history.record(entry("exported", TaskState::Succeeded));

        let json = history.export_to_json().unwrap();
        let parsed: Vec<HistoryEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title(), "exported");
        assert_eq!(parsed[0].duration(), Duration::from_millis(1500));
    }
}
