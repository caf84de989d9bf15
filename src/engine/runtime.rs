// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::triggers::Trigger;

use super::core::DispatcherCore;
use super::{unspawned_record, CoreCommand, DispatchEvent};

/// How long to wait for cancelled runs to report before giving up.
const CANCEL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// How long in-flight runs may continue after shutdown is requested
    /// before they are killed.
    pub shutdown_grace: Duration,
}

/// Drives the dispatcher core from the intake channel and carries out its
/// commands: runs go to the `ExecutorBackend`, trigger snapshots to the
/// producers, and shutdown to everyone watching `shutdown_tx`.
pub struct Runtime<E: ExecutorBackend> {
    core: DispatcherCore,
    intake_rx: mpsc::Receiver<DispatchEvent>,
    executor: E,
    triggers_tx: watch::Sender<Arc<Vec<Trigger>>>,
    shutdown_tx: watch::Sender<bool>,
    options: RuntimeOptions,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: DispatcherCore,
        intake_rx: mpsc::Receiver<DispatchEvent>,
        executor: E,
        triggers_tx: watch::Sender<Arc<Vec<Trigger>>>,
        shutdown_tx: watch::Sender<bool>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            core,
            intake_rx,
            executor,
            triggers_tx,
            shutdown_tx,
            options,
        }
    }

    /// Main event loop.
    ///
    /// Runs until shutdown has been requested and every admitted run has
    /// reported, or the grace period and the post-cancel wait have both
    /// expired. Returns the final core state.
    pub async fn run(mut self) -> Result<DispatcherCore> {
        info!("dispatcher started");
        self.triggers_tx.send_replace(self.core.triggers_snapshot());

        let mut deadline: Option<Instant> = None;
        let mut cancelled = false;

        loop {
            let event = match deadline {
                Some(at) => tokio::select! {
                    event = self.intake_rx.recv() => event,
                    _ = tokio::time::sleep_until(at) => {
                        if cancelled {
                            warn!(in_flight = self.core.in_flight(), "runs did not report after cancellation; exiting");
                            break;
                        }
                        warn!(in_flight = self.core.in_flight(), "shutdown grace period expired; killing running scripts");
                        self.executor.cancel_all().await?;
                        cancelled = true;
                        deadline = Some(Instant::now() + CANCEL_WAIT);
                        continue;
                    }
                },
                None => self.intake_rx.recv().await,
            };

            let Some(event) = event else {
                info!("intake channel closed; exiting");
                break;
            };
            debug!(?event, "dispatcher received event");

            let step = self.core.step(event, Utc::now());
            for command in step.commands {
                self.execute_command(command, &mut deadline).await?;
            }

            if !step.keep_running {
                info!("no runs in flight; dispatcher stopping");
                break;
            }
        }

        self.shutdown_tx.send_replace(true);
        info!("dispatcher exiting");
        Ok(self.core)
    }

    async fn execute_command(
        &mut self,
        command: CoreCommand,
        deadline: &mut Option<Instant>,
    ) -> Result<()> {
        match command {
            CoreCommand::Spawn(ticket) => {
                let script = ticket.script.clone();
                let run_id = ticket.run_id;
                if let Err(err) = self.executor.spawn_run(ticket.clone()).await {
                    warn!(script = %script, run_id, error = %err, "executor rejected run");
                    self.core
                        .complete_run(unspawned_record(ticket, &err.to_string()));
                }
            }
            CoreCommand::PublishTriggers(snapshot) => {
                debug!(triggers = snapshot.len(), "publishing trigger snapshot");
                self.triggers_tx.send_replace(snapshot);
            }
            CoreCommand::BeginShutdown => {
                info!(
                    grace_ms = self.options.shutdown_grace.as_millis() as u64,
                    "stopping producers"
                );
                self.shutdown_tx.send_replace(true);
                *deadline = Some(Instant::now() + self.options.shutdown_grace);
            }
        }
        Ok(())
    }
}
