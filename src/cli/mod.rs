//! CLI-specific functionality for taskdeck
//!
//! This module contains all CLI-related code including argument parsing,
//! configuration discovery, and the demo workload.

pub mod args;
pub mod config;
pub mod demo;

pub use args::{Args, CliMode, DemoConfig};
pub use config::ConfigDiscovery;
pub use demo::{ConsoleObserver, run_demo};
