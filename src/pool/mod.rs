//! # Execution Pools
//!
//! Three independent strategies for mapping queued tasks onto OS worker
//! threads, all built on the same [`ThreadPool`] core:
//!
//! - **Fixed**: at most `max_parallel_tasks` workers, spawned on demand and
//!   kept for the lifetime of the pool. Excess submissions wait in FIFO order.
//! - **Elastic**: grows on demand up to a cap; workers idle for longer than
//!   the keep-alive period retire.
//! - **Sequential**: a single worker, so jobs run strictly in submission order.
//!
//! ```text
//! submit(job) ──► queue ──► idle worker? ──yes──► run
//!                              │
//!                              no ──► workers < max? ──yes──► spawn worker
//!                                          │
//!                                          no ──► wait in queue
//! ```

mod worker;

pub use worker::{PoolJob, PoolStats, ThreadPool};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which execution strategy a pool implements
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Fixed,
    Elastic,
    Sequential,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolKind::Fixed => "fixed",
            PoolKind::Elastic => "elastic",
            PoolKind::Sequential => "sequential",
        };
        f.write_str(name)
    }
}
