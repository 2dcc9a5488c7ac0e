pub mod context;
pub(crate) mod execution;
pub mod record;
pub mod types;


pub use context::*;
pub use record::{Task, TaskBody, TaskBuilder, TaskHandle};
pub use types::*;
