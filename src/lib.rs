//! # taskdeck
//!
//! A task execution and notification engine. Callers submit units of
//! asynchronous, cancellable work; the engine runs them on three worker pools,
//! tracks their lifecycle, and turns every submission and terminal transition
//! into a user-facing notification delivered to a single observer.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: Task model, lifecycle states, capability set and the context
//!   handed to task bodies
//! - **[`pool`]**: Fixed, elastic and sequential worker pools on named OS threads
//! - **[`registry`]**: Authoritative set of active tasks and the queued subset
//! - **[`publisher`]**: Single-consumer channel applying transitions and
//!   delivering events to the observer
//! - **[`notification`]**: Policy deriving user-facing notices
//! - **[`history`]**: Most-recent-first log of terminal outcomes
//! - **[`engine`]**: Facade owning all of the above
//!
//! ```text
//! submit ──► Dispatcher ──► registry + queued set
//!               │
//!               ├──► Fixed / Elastic / Sequential pool ──► worker runs body
//!               │                                             │
//!               └──► Deferred store (saved, scheduled)        ▼
//!                                                    State Publisher (mpsc)
//!                                                             │
//!                                       apply state, history, notification
//!                                                             ▼
//!                                                          observer
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskdeck::{Engine, EngineConfig, Task, TaskKind};
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = Engine::new(EngineConfig::default())?;
//!
//!     let handle = engine.run_in_parallel(Task::new(
//!         "Convert files",
//!         TaskKind::LongRunning,
//!         |ctx| {
//!             ctx.checkpoint()?;
//!             Ok(serde_json::json!({ "converted": 12 }))
//!         },
//!     ))?;
//!
//!     println!("Finished as {}", handle.wait());
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

/// Task model and lifecycle.
pub mod task;

/// Worker pools.
pub mod pool;

/// Active task registry.
pub mod registry;

/// State publisher and observer interface.
pub mod publisher;

/// Notification policy.
pub mod notification;

/// Terminal outcome history.
pub mod history;

/// Saved and scheduled tasks.
pub mod deferred;

mod dispatcher;

/// Engine facade.
pub mod engine;

/// Engine configuration.
pub mod config;

/// Error types.
pub mod error;

/// Environment constants and path utilities.
///
/// Centralizes all hardcoded paths and names used throughout the crate.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use config::{ConsumerMode, EngineConfig};
pub use deferred::DeferredTaskInfo;
pub use engine::{Engine, EngineStatus};
pub use error::{EngineError, Result};
pub use history::{HistoryEntry, TaskHistory};
pub use notification::{Notification, NotificationPolicy, Occupancy};
pub use pool::{PoolKind, PoolStats};
pub use publisher::{EventPump, TaskEvent, TaskObserver};
pub use task::{
    ExecutionMode, OutputLocation, Task, TaskBuilder, TaskContext, TaskError, TaskHandle, TaskId,
    TaskKind, TaskKinds, TaskState, TaskValue,
};
