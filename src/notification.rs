//! # Notification Policy
//!
//! Derives the user-facing outcome of a submission or lifecycle transition from
//! the task's capabilities and flags, its state, and pool occupancy. The policy
//! is pure: it inspects data and never touches engine state.
//!
//! | Trigger                              | Outcome                               |
//! |--------------------------------------|---------------------------------------|
//! | saved task submitted                 | `Saved`, or `Scheduled` with a date   |
//! | sequential submit, chain busy        | `Queued`                              |
//! | parallel long-running submit         | `Submitted` if a fixed worker is free, else `Queued` |
//! | succeeded with warnings              | `SucceededWithWarnings`               |
//! | succeeded, notify-on-success set     | `Succeeded`                           |
//! | failed with a permission error       | `PermissionDenied`                    |
//! | failed otherwise                     | `Failed`                              |

use crate::pool::PoolStats;
use crate::task::{ExecutionMode, OutputLocation, Task, TaskError, TaskState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// User-facing outcome category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    Submitted {
        title: String,
    },
    Queued {
        title: String,
    },
    Saved {
        title: String,
    },
    Scheduled {
        title: String,
        run_at: DateTime<Utc>,
    },
    Succeeded {
        title: String,
        duration: Duration,
        output: Option<OutputLocation>,
    },
    SucceededWithWarnings {
        title: String,
        duration: Duration,
        warnings: Vec<String>,
    },
    Failed {
        title: String,
        duration: Duration,
        error: TaskError,
    },
    PermissionDenied {
        title: String,
        permission: String,
    },
}

impl Notification {
    /// Title of the task the notice is about
    pub fn task_title(&self) -> &str {
        match self {
            Notification::Submitted { title }
            | Notification::Queued { title }
            | Notification::Saved { title }
            | Notification::Scheduled { title, .. }
            | Notification::Succeeded { title, .. }
            | Notification::SucceededWithWarnings { title, .. }
            | Notification::Failed { title, .. }
            | Notification::PermissionDenied { title, .. } => title,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notification::Failed { .. } | Notification::PermissionDenied { .. }
        )
    }

    /// User-facing heading, e.g. `Task completed (in 3m 5s)`
    pub fn title(&self) -> String {
        match self {
            Notification::Submitted { .. } => "Task submitted".to_string(),
            Notification::Queued { .. } => "Task queued".to_string(),
            Notification::Saved { .. } => "Task saved".to_string(),
            Notification::Scheduled { .. } => "Task scheduled".to_string(),
            Notification::Succeeded { duration, .. } => {
                format!("Task completed (in {})", format_duration(*duration))
            }
            Notification::SucceededWithWarnings { duration, .. } => {
                format!(
                    "Task completed with warnings (in {})",
                    format_duration(*duration)
                )
            }
            Notification::Failed { duration, .. } => {
                format!("Task failed (in {})", format_duration(*duration))
            }
            Notification::PermissionDenied { .. } => "Permission denied".to_string(),
        }
    }

    /// Body text for the notice
    pub fn message(&self) -> String {
        match self {
            Notification::Submitted { title } => format!(
                "{} is running on background. You can see currently running tasks from the task manager.",
                title
            ),
            Notification::Queued { title } => format!(
                "{} is queued for execution. You can see currently running tasks from the task manager.",
                title
            ),
            Notification::Saved { title } => format!(
                "{} is saved to execute later. You can access and execute saved tasks from the task manager.",
                title
            ),
            Notification::Scheduled { title, run_at } => format!(
                "{} is scheduled for execution at {}.",
                title,
                run_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            Notification::Succeeded {
                title,
                output: Some(output),
                ..
            } => {
                if output.message.is_empty() {
                    format!(
                        "{} is successfully completed. Outputs are in {}.",
                        title,
                        output.directory.display()
                    )
                } else {
                    output.message.clone()
                }
            }
            Notification::Succeeded { title, .. } => {
                format!("{} is successfully completed.", title)
            }
            Notification::SucceededWithWarnings {
                title, warnings, ..
            } => format!(
                "{} is completed with {} warning(s):\n{}",
                title,
                warnings.len(),
                warnings.join("\n")
            ),
            Notification::Failed { title, error, .. } => {
                format!("{} has failed: {}", title, error)
            }
            Notification::PermissionDenied { title, permission } => format!(
                "{} requires the '{}' permission, which is not granted.",
                title, permission
            ),
        }
    }
}

/// Pool occupancy at the moment a submission is evaluated
#[derive(Debug, Clone, Copy)]
pub struct Occupancy {
    pub fixed: PoolStats,
    pub sequential: PoolStats,
}

/// Maps submissions and transitions to notifications
pub struct NotificationPolicy;

impl NotificationPolicy {
    /// Notice for a fresh submission, evaluated before the task is enqueued
    pub fn on_submit(
        task: &Task,
        mode: ExecutionMode,
        occupancy: &Occupancy,
    ) -> Option<Notification> {
        if mode.is_silent() {
            return None;
        }
        let title = task.title().to_string();

        if task.is_deferred() {
            return Some(match task.scheduled_at() {
                Some(run_at) => Notification::Scheduled { title, run_at },
                None => Notification::Saved { title },
            });
        }

        if mode.is_sequential() {
            return (occupancy.sequential.busy() > 0).then_some(Notification::Queued { title });
        }

        if task.is_long_running() {
            return Some(if occupancy.fixed.has_free_worker() {
                Notification::Submitted { title }
            } else {
                Notification::Queued { title }
            });
        }

        None
    }

    /// Notice for a lifecycle transition; only terminal states produce one
    pub fn on_transition(task: &Task, state: TaskState) -> Option<Notification> {
        let title = task.title().to_string();
        match state {
            TaskState::Succeeded => {
                let warnings = task.warnings();
                if !warnings.is_empty() {
                    Some(Notification::SucceededWithWarnings {
                        title,
                        duration: task.duration(),
                        warnings,
                    })
                } else if task.notify_on_success() {
                    Some(Notification::Succeeded {
                        title,
                        duration: task.duration(),
                        output: task.output_location().cloned(),
                    })
                } else {
                    None
                }
            }
            TaskState::Failed => {
                let error = task
                    .failure()
                    .unwrap_or_else(|| TaskError::failed("unknown failure"));
                match error {
                    TaskError::PermissionDenied { permission } => {
                        Some(Notification::PermissionDenied { title, permission })
                    }
                    error => Some(Notification::Failed {
                        title,
                        duration: task.duration(),
                        error,
                    }),
                }
            }
            TaskState::Pending | TaskState::Running | TaskState::Cancelled => None,
        }
    }
}

/// Human-readable duration, e.g. `850 ms`, `42s`, `3m 5s`, `1h 0m 12s`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    if total == 0 {
        return format!("{} ms", duration.as_millis());
    }
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolKind;
    use crate::task::record::Outcome;
    use crate::task::{TaskBuilder, TaskKind};
    use serde_json::Value;

    fn stats(kind: PoolKind, active: usize, queued: usize, max_workers: usize) -> PoolStats {
        PoolStats {
            kind,
            workers: active,
            active,
            idle: 0,
            queued,
            max_workers,
        }
    }

    fn occupancy(fixed_active: usize, fixed_queued: usize, sequential_busy: usize) -> Occupancy {
        Occupancy {
            fixed: stats(PoolKind::Fixed, fixed_active, fixed_queued, 2),
            sequential: stats(PoolKind::Sequential, sequential_busy.min(1), sequential_busy.saturating_sub(1), 1),
        }
    }

    fn finish(task: &Task, outcome: Outcome) {
        let now = Utc::now();
        task.apply_start(now).unwrap();
        task.apply_finish(now, outcome).unwrap();
    }

    #[test]
    fn test_long_running_submission_depends_on_fixed_pool() {
        let task = Task::new("Analysis", TaskKind::LongRunning, |_| Ok(Value::Null));

        let free = NotificationPolicy::on_submit(&task, ExecutionMode::Parallel, &occupancy(1, 0, 0));
        assert!(matches!(free, Some(Notification::Submitted { .. })));

        let full = NotificationPolicy::on_submit(&task, ExecutionMode::Parallel, &occupancy(2, 0, 0));
        assert!(matches!(full, Some(Notification::Queued { .. })));

        let backlog = NotificationPolicy::on_submit(&task, ExecutionMode::Parallel, &occupancy(1, 1, 0));
        assert!(matches!(backlog, Some(Notification::Queued { .. })));
    }

    #[test]
    fn test_pluggable_only_reported_when_long_running() {
        let quiet = TaskBuilder::new("Plugin")
            .kind(TaskKind::Pluggable)
            .build(|_| Ok(Value::Null));
        let loud = TaskBuilder::new("Plugin")
            .kind(TaskKind::Pluggable)
            .long_running(true)
            .build(|_| Ok(Value::Null));

        assert!(NotificationPolicy::on_submit(&quiet, ExecutionMode::Parallel, &occupancy(0, 0, 0)).is_none());
        assert!(matches!(
            NotificationPolicy::on_submit(&loud, ExecutionMode::Parallel, &occupancy(0, 0, 0)),
            Some(Notification::Submitted { .. })
        ));
    }

    #[test]
    fn test_sequential_submission_queued_only_when_chain_busy() {
        let task = Task::new("Step", TaskKind::ShortRunning, |_| Ok(Value::Null));

        assert!(NotificationPolicy::on_submit(&task, ExecutionMode::Sequential, &occupancy(0, 0, 0)).is_none());
        assert!(matches!(
            NotificationPolicy::on_submit(&task, ExecutionMode::Sequential, &occupancy(0, 0, 2)),
            Some(Notification::Queued { .. })
        ));
    }

    #[test]
    fn test_saved_and_scheduled_submissions() {
        let saved = TaskBuilder::new("Later").saved(None).build(|_| Ok(Value::Null));
        let run_at = Utc::now() + chrono::Duration::hours(1);
        let scheduled = TaskBuilder::new("Tonight")
            .saved(Some(run_at))
            .build(|_| Ok(Value::Null));

        assert!(matches!(
            NotificationPolicy::on_submit(&saved, ExecutionMode::Parallel, &occupancy(0, 0, 0)),
            Some(Notification::Saved { .. })
        ));
        assert_eq!(
            NotificationPolicy::on_submit(&scheduled, ExecutionMode::Parallel, &occupancy(0, 0, 0)),
            Some(Notification::Scheduled {
                title: "Tonight".to_string(),
                run_at
            })
        );
    }

    #[test]
    fn test_silent_submission_has_no_notice() {
        let task = Task::new("Quiet", TaskKind::LongRunning, |_| Ok(Value::Null));
        assert!(NotificationPolicy::on_submit(&task, ExecutionMode::Silent, &occupancy(2, 3, 0)).is_none());
        assert!(NotificationPolicy::on_submit(&task, ExecutionMode::SilentSequential, &occupancy(0, 0, 1)).is_none());
    }

    #[test]
    fn test_success_notices() {
        let plain = Task::new("Plain", TaskKind::ShortRunning, |_| Ok(Value::Null));
        finish(&plain, Outcome::Succeeded(Value::Null));
        assert!(matches!(
            NotificationPolicy::on_transition(&plain, TaskState::Succeeded),
            Some(Notification::Succeeded { output: None, .. })
        ));

        let muted = TaskBuilder::new("Muted")
            .notify_on_success(false)
            .build(|_| Ok(Value::Null));
        finish(&muted, Outcome::Succeeded(Value::Null));
        assert!(NotificationPolicy::on_transition(&muted, TaskState::Succeeded).is_none());

        let warned = TaskBuilder::new("Warned")
            .notify_on_success(false)
            .build(|_| Ok(Value::Null));
        warned.push_warning("disk almost full".to_string());
        finish(&warned, Outcome::Succeeded(Value::Null));
        match NotificationPolicy::on_transition(&warned, TaskState::Succeeded) {
            Some(Notification::SucceededWithWarnings { warnings, .. }) => {
                assert_eq!(warnings, vec!["disk almost full".to_string()]);
            }
            other => panic!("unexpected notice: {:?}", other),
        }

        let output = OutputLocation::new("/tmp/out").with_message("Plots saved.");
        let outputting = TaskBuilder::new("Export")
            .output_location(output.clone())
            .build(|_| Ok(Value::Null));
        finish(&outputting, Outcome::Succeeded(Value::Null));
        let notice = NotificationPolicy::on_transition(&outputting, TaskState::Succeeded).unwrap();
        assert_eq!(notice.message(), "Plots saved.");
        assert!(matches!(notice, Notification::Succeeded { output: Some(o), .. } if o == output));
    }

    #[test]
    fn test_failure_notices() {
        let denied = Task::new("Upload", TaskKind::LongRunning, |_| Ok(Value::Null));
        finish(
            &denied,
            Outcome::Failed(TaskError::permission_denied("upload_pilot_points")),
        );
        assert_eq!(
            NotificationPolicy::on_transition(&denied, TaskState::Failed),
            Some(Notification::PermissionDenied {
                title: "Upload".to_string(),
                permission: "upload_pilot_points".to_string()
            })
        );

        let broken = Task::new("Parse", TaskKind::LongRunning, |_| Ok(Value::Null));
        finish(&broken, Outcome::Failed(TaskError::failed("bad header")));
        let notice = NotificationPolicy::on_transition(&broken, TaskState::Failed).unwrap();
        assert!(notice.is_error());
        assert!(notice.title().starts_with("Task failed (in "));
        assert!(matches!(notice, Notification::Failed { error, .. } if error == TaskError::failed("bad header")));
    }

    #[test]
    fn test_non_terminal_and_cancelled_have_no_notice() {
        let task = Task::new("Any", TaskKind::LongRunning, |_| Ok(Value::Null));
        assert!(NotificationPolicy::on_transition(&task, TaskState::Pending).is_none());
        assert!(NotificationPolicy::on_transition(&task, TaskState::Running).is_none());
        assert!(NotificationPolicy::on_transition(&task, TaskState::Cancelled).is_none());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850 ms");
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m 5s");
        assert_eq!(format_duration(Duration::from_secs(3612)), "1h 0m 12s");
    }
}
