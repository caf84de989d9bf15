// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The dispatcher hands admitted runs to an `ExecutorBackend` instead of
//! spawning processes itself, so tests can swap in a fake backend that
//! records tickets and reports completions on demand.
//!
//! Whatever the backend, every ticket it accepts must eventually come back
//! to the dispatcher as exactly one `DispatchEvent::RunFinished`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::DispatchEvent;
use crate::errors::Result;

use super::runner::run_script;
use super::{ExecLimits, RunTicket};

pub trait ExecutorBackend: Send {
    /// Start executing an admitted run. Must not wait for it to finish.
    fn spawn_run(
        &mut self,
        ticket: RunTicket,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Forcibly terminate everything still running. Each terminated run
    /// still reports its record.
    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production backend: one Tokio task per run, each driving an OS process
/// through [`run_script`].
pub struct ProcessBackend {
    limits: Arc<ExecLimits>,
    intake_tx: mpsc::Sender<DispatchEvent>,
    cancel_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ProcessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessBackend")
            .field("limits", &self.limits)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl ProcessBackend {
    pub fn new(limits: ExecLimits, intake_tx: mpsc::Sender<DispatchEvent>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            limits: Arc::new(limits),
            intake_tx,
            cancel_tx,
            tasks: Vec::new(),
        }
    }
}

impl ExecutorBackend for ProcessBackend {
    fn spawn_run(
        &mut self,
        ticket: RunTicket,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.tasks.retain(|t| !t.is_finished());

            let limits = Arc::clone(&self.limits);
            let intake_tx = self.intake_tx.clone();
            let cancel_rx = self.cancel_tx.subscribe();

            let handle = tokio::spawn(async move {
                let script = ticket.script.clone();
                let run_id = ticket.run_id;
                let record = run_script(ticket, &limits, cancel_rx).await;
                if intake_tx.send(DispatchEvent::RunFinished(record)).await.is_err() {
                    warn!(script = %script, run_id, "dispatcher gone; execution record lost");
                }
            });
            self.tasks.push(handle);
            debug!(active = self.tasks.len(), "run task spawned");
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.tasks.retain(|t| !t.is_finished());
            info!(active = self.tasks.len(), "cancelling running scripts");
            self.cancel_tx.send_replace(true);
            Ok(())
        })
    }
}
