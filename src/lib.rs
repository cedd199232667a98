// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod identity;
pub mod logging;
pub mod model;
pub mod runtime;
pub mod storage;
pub mod types;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::config::model::{ConfigFile, TaskWork};
use crate::driver::DriverRegistry;
use crate::engine::{Pipeline, PipelineReport, PipelineRunner};
use crate::exec::ExecutorRegistry;
use crate::model::{SourceKind, TaskDef, TaskRuntimeState};
use crate::storage::{MemoryStore, StorageRegistry};
use crate::types::cancel_pair;

pub use crate::errors::{Result as StreamdagResult, StreamdagError};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - in-memory persistence and the in-memory driver
/// - executor dispatch and the pipeline runner
/// - Ctrl-C handling
///
/// Returns whether the pipeline finished successfully.
pub async fn run(args: CliArgs) -> Result<bool> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let pipeline = Pipeline::from_config(pipeline_name(&config_path), &cfg)?;

    if args.dry_run {
        print_dry_run(&cfg, &pipeline);
        return Ok(true);
    }

    let mut registry = StorageRegistry::new();
    MemoryStore::<TaskRuntimeState>::new().register_into(&mut registry);
    MemoryStore::<TaskDef>::new().register_into(&mut registry);

    let driver = cfg.memory_driver();
    let drivers = DriverRegistry::new()
        .with(SourceKind::Database, driver.clone())
        .with(SourceKind::File, driver);

    let runner = PipelineRunner::new(registry, ExecutorRegistry::with_drivers(&drivers))
        .with_max_workers(args.max_workers.unwrap_or(cfg.config.max_workers))
        .with_channel_policy(cfg.channel_policy());

    // Ctrl-C → cancel the run.
    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        handle.cancel();
    });

    info!(pipeline = %pipeline.name(), tasks = pipeline.len(), "running pipeline");
    let report = runner.run_with_cancel(&pipeline, signal).await?;
    print_report(&report);
    Ok(report.is_success())
}

/// Pipeline name: the config file stem, or `pipeline`.
fn pipeline_name(config_path: &Path) -> String {
    config_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pipeline".to_string())
}

fn print_report(report: &PipelineReport) {
    println!("root #{}: {}", report.root_oid, report.status);
    if !report.error.is_empty() {
        println!("  error: {}", report.error);
    }
    for (name, task) in &report.tasks {
        println!("  - {name} (#{}): {}", task.oid, task.status);
        if !task.error.is_empty() {
            println!("      error: {}", task.error);
        }
        if task.dropped_emissions > 0 {
            println!("      dropped blocks: {}", task.dropped_emissions);
        }
    }
}

/// Simple dry-run output: print sources, tasks, deps and streams.
fn print_dry_run(cfg: &ConfigFile, pipeline: &Pipeline) {
    println!("streamdag dry-run: {}", pipeline.name());
    println!("  config.max_workers = {}", cfg.config.max_workers);
    println!("  config.batch_size = {}", cfg.config.batch_size);
    println!("  config.channel_buffer = {}", cfg.config.channel_buffer);
    println!("  config.max_inflight_batches = {}", cfg.config.max_inflight_batches);
    println!();

    println!("sources ({}):", cfg.source.len());
    for (name, source) in cfg.source.iter() {
        println!("  - {name} ({})", source.kind());
    }
    println!();

    println!("tasks ({}):", cfg.task.len());
    for (name, task) in cfg.task.iter() {
        println!("  - {name}");
        match &task.work {
            TaskWork::Query {
                source,
                sql,
                batch_size,
                ..
            } => {
                println!("      query on {source}: {sql}");
                println!(
                    "      batch_size: {}",
                    batch_size.unwrap_or(cfg.config.batch_size)
                );
            }
            TaskWork::OptionQuery { source, option } => {
                println!("      option '{option}' on {source}");
            }
            TaskWork::BatchInsert { target, data } => {
                println!("      batch insert into {target}");
                if !data.is_empty() {
                    println!("      seed rows: {}", data.len());
                }
            }
        }
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        if let Some(ref from) = task.stream_from {
            println!("      stream_from: {from}");
        }
    }

    debug!("dry-run complete (no execution)");
}
