// src/lib.rs

pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod registry;
pub mod triggers;
pub mod types;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::clock::spawn_clock;
use crate::config::{load_and_validate, ConfigFile};
use crate::engine::{
    DispatchEvent, DispatcherCore, DispatcherHandle, RunOutcome, Runtime, RuntimeOptions,
};
use crate::exec::{ExecLimits, ExecStatus, ExecutionRecord, ProcessBackend, Supervisor};
use crate::fs::{FileSystem, RealFileSystem};
use crate::registry::{spawn_scripts_watcher, DirScriptStore, ScriptRegistry};
use crate::triggers::TriggerStore;
use crate::watch::{spawn_event_watcher, Backoff, LineController};

/// Capacity of the dispatcher intake channel shared by all producers.
pub const INTAKE_CAPACITY: usize = 256;

const RECORD_POLL: Duration = Duration::from_millis(100);

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - script registry and trigger store
/// - dispatcher runtime with the process executor
/// - clock, event watcher and scripts directory watcher
/// - Ctrl-C / SIGTERM handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    info!(config = ?config_path, "configuration loaded");

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let store = DirScriptStore::new(&cfg.daemon.scripts_dir, Arc::clone(&fs));
    let registry = ScriptRegistry::load(Arc::new(store))?;
    let triggers = TriggerStore::load(
        &cfg.daemon.triggers_file,
        fs,
        cfg.daemon.utc_offset,
        cfg.daemon.missed_fires,
        Utc::now(),
    )?;

    if args.dry_run {
        print_dry_run(&cfg, &registry, &triggers);
        return Ok(());
    }

    let (intake_tx, intake_rx) = mpsc::channel::<DispatchEvent>(INTAKE_CAPACITY);
    let core = DispatcherCore::new(
        registry,
        triggers,
        Supervisor::new(cfg.exec.max_concurrent),
    );
    let (triggers_tx, triggers_rx) = tokio::sync::watch::channel(core.triggers_snapshot());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let executor = ProcessBackend::new(ExecLimits::from(&cfg.exec), intake_tx.clone());
    let runtime = Runtime::new(
        core,
        intake_rx,
        executor,
        triggers_tx,
        shutdown_tx,
        RuntimeOptions {
            shutdown_grace: cfg.exec.shutdown_grace,
        },
    );
    let handle = DispatcherHandle::new(intake_tx.clone());

    spawn_signal_listener(handle.clone());

    let mut producers = Vec::new();
    let mut _scripts_watcher = None;
    let mut once = None;

    match args.run {
        Some(script) => {
            // One-shot mode: no producers, just the requested run.
            once = Some(tokio::spawn(run_once(handle.clone(), script)));
        }
        None => {
            producers.push(spawn_clock(
                intake_tx.clone(),
                triggers_rx.clone(),
                cfg.daemon.tick_interval,
                cfg.daemon.utc_offset,
                shutdown_rx.clone(),
            ));

            if let Some(address) = &cfg.controller.address {
                info!(address = %address, "attaching controller event source");
                producers.push(spawn_event_watcher(
                    Arc::new(LineController::new(address.clone())),
                    intake_tx.clone(),
                    triggers_rx.clone(),
                    Backoff::new(cfg.controller.reconnect_initial, cfg.controller.reconnect_max),
                    shutdown_rx.clone(),
                ));
            } else {
                info!("no controller address configured; event triggers are inactive");
            }

            if cfg.daemon.watch_scripts_dir {
                match spawn_scripts_watcher(
                    &cfg.daemon.scripts_dir,
                    intake_tx.clone(),
                    shutdown_rx.clone(),
                ) {
                    Ok(watcher) => _scripts_watcher = Some(watcher),
                    Err(err) => warn!(error = %err, "scripts directory is not watched"),
                }
            }
        }
    }
    drop(intake_tx);

    let core = runtime.run().await?;
    debug!(records = core.supervisor().records().len(), "dispatcher finished");

    for producer in producers {
        if let Err(err) = producer.await {
            warn!(error = %err, "producer task ended abnormally");
        }
    }

    if let Some(once) = once {
        match once.await? {
            Some(ExecStatus::Success) => {}
            Some(status) => bail!("script finished with status {status}"),
            None => bail!("manual run did not complete"),
        }
    }

    info!("scriptd stopped");
    Ok(())
}

/// Manual run for `--run`: start it, wait for its record, print it as JSON,
/// then shut the daemon down. Returns the run's status if it completed.
async fn run_once(handle: DispatcherHandle, script: String) -> Option<ExecStatus> {
    let status = match wait_for_manual_run(&handle, &script).await {
        Ok(record) => {
            match serde_json::to_string_pretty(&record) {
                Ok(json) => println!("{json}"),
                Err(err) => warn!(error = %err, "could not encode execution record"),
            }
            Some(record.status)
        }
        Err(err) => {
            eprintln!("scriptd: {err:#}");
            None
        }
    };
    if let Err(err) = handle.shutdown().await {
        warn!(error = %err, "dispatcher was already gone at shutdown");
    }
    status
}

async fn wait_for_manual_run(handle: &DispatcherHandle, script: &str) -> Result<ExecutionRecord> {
    let run_id = match handle.run_manual(script).await? {
        RunOutcome::Started { run_id } => run_id,
        RunOutcome::Busy { reason } => bail!("script '{script}' is busy: {reason}"),
        RunOutcome::NotFound => bail!("script '{script}' not found"),
    };

    loop {
        if let Some(record) = handle.last_record(script).await? {
            if record.run_id == run_id {
                return Ok(record);
            }
        }
        tokio::time::sleep(RECORD_POLL).await;
    }
}

/// Ctrl-C (and SIGTERM on unix) → graceful shutdown.
fn spawn_signal_listener(handle: DispatcherHandle) {
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("termination signal received");
        if let Err(err) = handle.shutdown().await {
            warn!(error = %err, "could not request dispatcher shutdown");
        }
    });
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to listen for SIGTERM; only Ctrl-C will stop the daemon");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Simple dry-run output: print config, scripts and triggers.
fn print_dry_run(cfg: &ConfigFile, registry: &ScriptRegistry, triggers: &TriggerStore) {
    println!("scriptd dry-run");
    println!("  daemon.scripts_dir = {}", cfg.daemon.scripts_dir.display());
    println!("  daemon.triggers_file = {}", cfg.daemon.triggers_file.display());
    println!("  daemon.tick_interval = {:?}", cfg.daemon.tick_interval);
    println!("  daemon.missed_fires = {:?}", cfg.daemon.missed_fires);
    println!("  daemon.utc_offset = {}", cfg.daemon.utc_offset);
    println!("  exec.max_concurrent = {}", cfg.exec.max_concurrent);
    println!("  exec.timeout = {:?}", cfg.exec.timeout);
    println!("  exec.output_limit = {}", cfg.exec.output_limit);
    if let Some(interpreter) = &cfg.exec.interpreter {
        println!("  exec.interpreter = {interpreter} {:?}", cfg.exec.interpreter_args);
    }
    match &cfg.controller.address {
        Some(address) => println!("  controller.address = {address}"),
        None => println!("  controller.address = (none)"),
    }
    println!();

    println!("scripts ({}):", registry.len());
    for script in registry.list() {
        let state = if script.enabled { "" } else { " (disabled)" };
        println!("  - {}{state}: {}", script.id, script.path.display());
    }
    println!();

    println!("triggers ({}):", triggers.len());
    for trigger in triggers.list() {
        let state = if trigger.enabled { "" } else { " (disabled)" };
        println!("  - {}{state} -> {}: {}", trigger.id, trigger.script, trigger.kind);
        if let Some(next) = trigger.next_fire() {
            println!("      next_fire: {next}");
        }
    }

    debug!("dry-run complete (no execution)");
}
