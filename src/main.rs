use anyhow::Context;
use taskdeck::cli::{Args, CliMode, ConfigDiscovery, DemoConfig, run_demo};
use taskdeck::env::runtime::DEFAULT_LOG_FILTER;
use taskdeck::EngineConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match mode {
        CliMode::Demo(demo) => run_demo_mode(demo),
        CliMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            Ok(())
        }
        CliMode::InitConfig { path, force } => {
            ConfigDiscovery::write_default_config(&path, force)
                .with_context(|| format!("Failed to write configuration to {:?}", path))?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

fn run_demo_mode(demo: DemoConfig) -> anyhow::Result<()> {
    let mut config = match &demo.config_override {
        Some(path) => {
            info!("Loading configuration override from: {:?}", path);
            EngineConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))?
        }
        None => ConfigDiscovery::discover_config()?,
    };
    if let Some(max_parallel) = demo.max_parallel_override {
        config.max_parallel_tasks = max_parallel;
    }

    info!("Starting demo workload");
    let failed = run_demo(config, &demo)?;
    if failed > 0 {
        println!();
        println!("{} task(s) failed", failed);
    }
    Ok(())
}
