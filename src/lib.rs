// src/lib.rs

pub mod cli;
pub mod config;
pub mod console;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod task;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{config_root_dir, load_and_validate};
use crate::engine::{Runtime, RuntimeEvent, Scheduler};
use crate::exec::{CommandExporter, TokioLauncher};
use crate::fs::RealFileSystem;
use crate::task::{BoxedTask, Model, TaskRequest, build_tasks};
use crate::types::{ConcurrencyLimit, RunMode};

/// High-level entry point used by `main.rs`. Returns the process exit
/// status.
///
/// This wires together:
/// - config loading and the resolved model
/// - scheduler / launcher / runtime
/// - console input (interactive runs)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let root = config_root_dir(&config_path);
    let model = Arc::new(Model::from_config(&cfg, &root));

    // Prepared inputs are meant for unattended execution.
    let mode = RunMode::from_batch_flag(args.batch || args.prepare_batch || cfg.config.batch);
    let limit = ConcurrencyLimit::new(
        args.max_concurrent
            .unwrap_or(cfg.config.max_concurrent_processes),
    );
    let ceiling = limit.get();
    let tasks = requested_tasks(&args.tasks, &model)?;

    if args.dry_run {
        print_dry_run(&model, mode, &limit, &tasks);
        return Ok(0);
    }

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let launcher = TokioLauncher::new(rt_tx.clone());
    let scheduler = Scheduler::new(
        model.clone(),
        Arc::new(RealFileSystem),
        Box::new(launcher),
        limit,
        mode,
    );

    if args.prepare_batch {
        return Ok(prepare_batch(scheduler.preparing_batch(), tasks));
    }

    // Ctrl-C → kill everything, exit after the last completion.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    if mode == RunMode::Interactive {
        tokio::spawn(console::read_commands(
            tokio::io::stdin(),
            model.clone(),
            rt_tx.clone(),
        ));
    }

    info!(count = tasks.len(), ?mode, ceiling, "submitting requested tasks");
    rt_tx
        .send(RuntimeEvent::Push(tasks))
        .await
        .map_err(|_| anyhow!("runtime event channel closed before start"))?;

    let exporter = CommandExporter::new(model.root.clone());
    let runtime = Runtime::new(scheduler, rt_rx, exporter);
    Ok(runtime.run().await?)
}

/// Write the inputs of `tasks` and their prerequisites. No process is
/// started, so a single drain runs the whole closure.
pub fn prepare_batch(mut scheduler: Scheduler, tasks: Vec<BoxedTask>) -> i32 {
    info!(count = tasks.len(), "preparing input files for batch execution");
    scheduler.push_all(tasks);
    let status = match scheduler.drain() {
        Some(request) => request.status,
        None => scheduler.failure_status().unwrap_or(0),
    };
    if status == 0 {
        info!("batch input files prepared");
    } else {
        warn!(status, "batch preparation failed");
    }
    status
}

fn requested_tasks(requests: &[String], model: &Model) -> Result<Vec<BoxedTask>> {
    let mut tasks = Vec::new();
    for raw in requests {
        let request: TaskRequest = raw.parse()?;
        tasks.extend(build_tasks(&request, model)?);
    }
    Ok(tasks)
}

/// Simple dry-run output: print the model and the tasks that would run.
fn print_dry_run(model: &Model, mode: RunMode, limit: &ConcurrencyLimit, tasks: &[BoxedTask]) {
    println!("stagechain dry-run");
    println!("  mode = {mode:?}");
    println!("  max_concurrent_processes = {}", limit.get());
    println!("  results = {}", model.layout.root().display());
    println!();

    println!("parts ({}):", model.parts.len());
    for part in model.parts.values() {
        println!("  - {} (modes: {})", part.name, part.modes);
        println!("      fe_file: {}", part.fe_file.display());
        if part.locked {
            println!("      locked: true");
        }
        if !part.groups.is_empty() {
            println!("      groups: {:?}", part.groups);
        }
    }

    println!("events ({}):", model.events.len());
    for event in model.events.values() {
        match &event.description {
            Some(description) => println!("  - {} ({description})", event.name),
            None => println!("  - {}", event.name),
        }
    }

    println!("tasks ({}):", tasks.len());
    for task in tasks {
        println!("  - {}", task.identity());
        println!("      process: {}", task.signature(model));
    }

    debug!("dry-run complete (no execution)");
}
