//! Synthetic workload for trying the engine from the command line

use super::args::DemoConfig;
use crate::notification::format_duration;
use crate::publisher::{TaskEvent, TaskObserver};
use crate::task::{OutputLocation, Task, TaskBuilder, TaskError, TaskKind, TaskState};
use crate::{Engine, EngineConfig};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Prints every notification, and state changes when verbose
pub struct ConsoleObserver {
    verbose: bool,
}

impl ConsoleObserver {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TaskObserver for ConsoleObserver {
    fn handle_event(&self, event: &TaskEvent) -> anyhow::Result<()> {
        match event {
            TaskEvent::Notified { notification, .. } => {
                let marker = if notification.is_error() { "✗" } else { "•" };
                println!("{} {}: {}", marker, notification.title(), notification.message());
            }
            TaskEvent::StateChanged {
                task, new_state, ..
            } if self.verbose => {
                println!("  [{}] {} -> {}", task.id(), task.title(), new_state);
            }
            TaskEvent::StateChanged { .. } => {}
        }
        Ok(())
    }
}

/// Run the demo workload and return the number of failed tasks
pub fn run_demo(config: EngineConfig, demo: &DemoConfig) -> anyhow::Result<usize> {
    let engine = Engine::new(config)?;
    engine.subscribe(Arc::new(ConsoleObserver::new(demo.verbose)))?;

    for i in 0..demo.parallel_tasks {
        engine.run_in_parallel(simulated_work(format!("Analysis {}", i + 1), 150 + 50 * i as u64))?;
    }

    let chain = (0..demo.chain_length).map(|i| {
        Task::new(format!("Step {}", i + 1), TaskKind::ShortRunning, move |ctx| {
            let previous = ctx
                .previous_result()
                .and_then(|value| value.as_i64())
                .unwrap_or(0);
            thread::sleep(Duration::from_millis(50));
            Ok(json!(previous + i as i64 + 1))
        })
    });
    engine.run_all_sequentially(chain)?;

    let export_dir = std::env::temp_dir().join("taskdeck-demo");
    engine.run_in_parallel(
        TaskBuilder::new("Export report")
            .output_location(
                OutputLocation::new(&export_dir).with_button_text("Open folder"),
            )
            .build(|_| Ok(json!({ "files": 3 }))),
    )?;

    engine.run_in_parallel(Task::new("Cleanup", TaskKind::ShortRunning, |ctx| {
        ctx.add_warning("2 temporary files could not be removed");
        Ok(serde_json::Value::Null)
    }))?;

    engine.run_in_parallel(Task::new("Upload results", TaskKind::LongRunning, |_| {
        Err(TaskError::permission_denied("upload_results"))
    }))?;

    let saved = TaskBuilder::new("Nightly rebuild")
        .saved(None)
        .build(|_| Ok(serde_json::Value::Null));
    let saved_id = saved.id();
    engine.run_in_parallel(saved)?;
    engine.trigger_deferred(saved_id)?;

    if !engine.wait_for_idle(Duration::from_secs(120)) {
        anyhow::bail!("demo workload did not finish within two minutes");
    }
    engine.shutdown();

    println!();
    println!("History (most recent first):");
    let history = engine.history();
    for entry in &history {
        println!(
            "  {:<20} {:<10} {}",
            entry.title(),
            entry.final_state().to_string(),
            format_duration(entry.duration())
        );
    }

    if demo.history_json {
        println!("{}", engine.export_history_json()?);
    }

    Ok(history
        .iter()
        .filter(|entry| entry.final_state() == TaskState::Failed)
        .count())
}

fn simulated_work(title: String, millis: u64) -> Task {
    Task::new(title, TaskKind::LongRunning, move |ctx| {
        for _ in 0..10 {
            ctx.checkpoint()?;
            thread::sleep(Duration::from_millis(millis / 10));
        }
        Ok(json!({ "elapsed_ms": millis }))
    })
}
