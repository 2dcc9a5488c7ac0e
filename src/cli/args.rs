//! Command line argument parsing
//!
//! Subcommands:
//! - `demo`: Run a synthetic workload and print notifications and history
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write a default configuration file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, PartialEq)]
pub enum CliMode {
    Demo(DemoConfig),
    ShowConfig,
    InitConfig { path: PathBuf, force: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoConfig {
    pub config_override: Option<PathBuf>,
    pub parallel_tasks: usize,
    pub chain_length: usize,
    pub max_parallel_override: Option<usize>,
    pub history_json: bool,
    pub verbose: bool,
}

#[derive(Debug, Parser)]
#[command(name = "taskdeck")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Task execution and notification engine with fixed, elastic and sequential pools")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a synthetic workload through the engine
    Demo {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Number of long-running parallel tasks
        #[arg(short = 'p', long = "parallel", default_value_t = 5)]
        parallel: usize,
        /// Number of tasks in the sequential chain
        #[arg(short = 's', long = "chain", default_value_t = 3)]
        chain: usize,
        /// Override the fixed pool size
        #[arg(long = "max-parallel", value_name = "N")]
        max_parallel: Option<usize>,
        /// Print the history as JSON at the end
        #[arg(long = "history-json")]
        history_json: bool,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Show configuration discovery information
    ShowConfig,
    /// Write a default configuration file
    InitConfig {
        /// Destination path
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(short = 'f', long = "force")]
        force: bool,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<CliMode, String> {
        match &self.command {
            Some(Commands::Demo {
                config,
                parallel,
                chain,
                max_parallel,
                history_json,
                verbose,
            }) => Ok(CliMode::Demo(DemoConfig {
                config_override: config.clone(),
                parallel_tasks: *parallel,
                chain_length: *chain,
                max_parallel_override: *max_parallel,
                history_json: *history_json,
                verbose: *verbose,
            })),
            Some(Commands::ShowConfig) => Ok(CliMode::ShowConfig),
            Some(Commands::InitConfig { path, force }) => Ok(CliMode::InitConfig {
                path: path.clone(),
                force: *force,
            }),
            None => Err(
                "No command specified. Use 'taskdeck --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_defaults() {
        let args = Args::try_parse_from(["taskdeck", "demo"]).unwrap();
        match args.mode().unwrap() {
            CliMode::Demo(config) => {
                assert_eq!(config.parallel_tasks, 5);
                assert_eq!(config.chain_length, 3);
                assert!(config.config_override.is_none());
                assert!(config.max_parallel_override.is_none());
                assert!(!config.history_json);
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_demo_options() {
        let args = Args::try_parse_from([
            "taskdeck",
            "demo",
            "-c",
            "custom.toml",
            "--parallel",
            "8",
            "--max-parallel",
            "2",
            "--history-json",
        ])
        .unwrap();
        match args.mode().unwrap() {
            CliMode::Demo(config) => {
                assert_eq!(config.config_override, Some(PathBuf::from("custom.toml")));
                assert_eq!(config.parallel_tasks, 8);
                assert_eq!(config.max_parallel_override, Some(2));
                assert!(config.history_json);
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_init_config_command() {
        let args = Args::try_parse_from(["taskdeck", "init-config", "out.toml", "--force"]).unwrap();
        assert_eq!(
            args.mode().unwrap(),
            CliMode::InitConfig {
                path: PathBuf::from("out.toml"),
                force: true
            }
        );
    }

    #[test]
    fn test_show_config_command() {
        let args = Args::try_parse_from(["taskdeck", "show-config"]).unwrap();
        assert_eq!(args.mode().unwrap(), CliMode::ShowConfig);
    }

    #[test]
    fn test_no_command() {
        let args = Args { command: None };
        assert!(args.mode().is_err());
    }
}
