//! Environment constants and path utilities for taskdeck.
//!
//! This module centralizes the hardcoded names and paths used throughout the
//! crate, making them easier to maintain and modify.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const TASKDECK_DIR_NAME: &str = ".taskdeck";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Standalone configuration file name in a project directory
pub const PROJECT_CONFIG_FILE_NAME: &str = "taskdeck.toml";

/// System-wide configuration directory (Unix-like systems)
pub const SYSTEM_CONFIG_DIR: &str = "/etc/taskdeck";

/// Thread naming and logging defaults
pub mod runtime {
    /// Prefix of every thread the engine spawns
    pub const DEFAULT_THREAD_PREFIX: &str = "taskdeck";

    /// Suffix of the dedicated event consumer thread name
    pub const CONSUMER_THREAD_SUFFIX: &str = "events";

    /// Log filter used when `RUST_LOG` is unset
    pub const DEFAULT_LOG_FILTER: &str = "taskdeck=info";
}

/// Build `./taskdeck.toml` from a project directory
pub fn project_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(PROJECT_CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(TASKDECK_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(TASKDECK_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build the system-wide config file path
pub fn system_config_file_path() -> PathBuf {
    Path::new(SYSTEM_CONFIG_DIR).join(CONFIG_FILE_NAME)
}

/// Name of the dedicated consumer thread for a given prefix
pub fn consumer_thread_name(prefix: &str) -> String {
    format!("{}-{}", prefix, runtime::CONSUMER_THREAD_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.taskdeck/config.toml")
        );

        assert_eq!(
            local_config_file_path(current_dir),
            Path::new("/current/project/.taskdeck/config.toml")
        );

        assert_eq!(
            project_config_file_path(current_dir),
            Path::new("/current/project/taskdeck.toml")
        );

        assert_eq!(
            system_config_file_path(),
            Path::new("/etc/taskdeck/config.toml")
        );
    }

    #[test]
    fn test_consumer_thread_name() {
        assert_eq!(consumer_thread_name("taskdeck"), "taskdeck-events");
    }
}
