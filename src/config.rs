use crate::env;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Where the state publisher's consumer runs
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerMode {
    /// The engine spawns a named consumer thread
    #[default]
    Dedicated,
    /// The embedder takes the event pump and drives it
    External,
}

/// Engine configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker count of the fixed pool
    pub max_parallel_tasks: usize,
    /// Upper bound on elastic pool workers
    pub elastic_max_workers: usize,
    pub elastic_idle_timeout_secs: u64,
    /// How long shutdown waits for workers before requesting cancellation
    pub shutdown_grace_secs: u64,
    pub thread_name_prefix: String,
    pub consumer: ConsumerMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            max_parallel_tasks: parallelism,
            elastic_max_workers: 64,
            elastic_idle_timeout_secs: 60,
            shutdown_grace_secs: 60,
            thread_name_prefix: env::runtime::DEFAULT_THREAD_PREFIX.to_string(),
            consumer: ConsumerMode::Dedicated,
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_tasks == 0 {
            return Err(EngineError::InvalidConfig(
                "max_parallel_tasks must be at least 1".to_string(),
            ));
        }
        if self.elastic_max_workers == 0 {
            return Err(EngineError::InvalidConfig(
                "elastic_max_workers must be at least 1".to_string(),
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn elastic_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.elastic_idle_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.max_parallel_tasks >= 1);
        assert_eq!(config.consumer, ConsumerMode::Dedicated);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
max_parallel_tasks = 3
consumer = "external"
"#,
        )
        .unwrap();
        assert_eq!(config.max_parallel_tasks, 3);
        assert_eq!(config.consumer, ConsumerMode::External);
        assert_eq!(config.thread_name_prefix, "taskdeck");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_toml_str("max_parallel_tasks = 0").unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));

        let err = EngineConfig::from_toml_str("thread_name_prefix = \"  \"").unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));

        let err = EngineConfig::from_toml_str("max_parallel_tasks = \"many\"").unwrap_err();
        assert!(matches!(err, EngineError::ConfigParse(_)));
    }
}
