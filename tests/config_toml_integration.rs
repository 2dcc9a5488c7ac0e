use taskdeck::cli::ConfigDiscovery;
use taskdeck::{ConsumerMode, Engine, EngineConfig, EngineError};
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_config_file_operations() {
    let original_config = EngineConfig {
        max_parallel_tasks: 3,
        elastic_max_workers: 12,
        consumer: ConsumerMode::External,
        ..Default::default()
    };

    let temp_file = NamedTempFile::new().expect("Should be able to create temporary file");
    let temp_path = temp_file.path();

    original_config
        .to_toml_file(temp_path)
        .expect("Should be able to save config to file");
    let loaded_config =
        EngineConfig::from_toml_file(temp_path).expect("Should be able to load config from file");

    assert_eq!(original_config, loaded_config);
}

#[test]
fn test_partial_config_uses_defaults() {
    let config = EngineConfig::from_toml_str(
        r#"
max_parallel_tasks = 2
consumer = "external"
"#,
    )
    .expect("Partial config should parse");

    let defaults = EngineConfig::default();
    assert_eq!(config.max_parallel_tasks, 2);
    assert_eq!(config.consumer, ConsumerMode::External);
    assert_eq!(config.elastic_max_workers, defaults.elastic_max_workers);
    assert_eq!(config.thread_name_prefix, defaults.thread_name_prefix);
}

#[test]
fn test_invalid_config_values_rejected() {
    let err = EngineConfig::from_toml_str("max_parallel_tasks = 0").unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));

    let err = EngineConfig::from_toml_str("consumer = \"sometimes\"").unwrap_err();
    assert!(matches!(err, EngineError::ConfigParse(_)));

    let err = EngineConfig::from_toml_file("/nonexistent/taskdeck.toml").unwrap_err();
    assert!(matches!(err, EngineError::ConfigIo(_)));
}

#[test]
fn test_written_default_config_starts_an_engine() {
    let temp_dir = TempDir::new().expect("Should be able to create temp dir");
    let path = temp_dir.path().join("nested").join("taskdeck.toml");

    ConfigDiscovery::write_default_config(&path, false).expect("Should write default config");
    assert!(ConfigDiscovery::write_default_config(&path, false).is_err());
    ConfigDiscovery::write_default_config(&path, true).expect("Force should overwrite");

    let mut config = EngineConfig::from_toml_file(&path).expect("Should load written config");
    config.max_parallel_tasks = 1;
    let engine = Engine::new(config).expect("Engine should start from written config");
    assert!(engine.status().accepting);
    assert!(engine.shutdown());
}
