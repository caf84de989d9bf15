use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;

use scriptd::engine::DispatchEvent;
use scriptd::errors::Result;
use scriptd::exec::{ExecStatus, ExecutionRecord, ExecutorBackend, RunId, RunTicket};

/// Record for `ticket` as if it had just finished with `status`.
pub fn record_for(ticket: &RunTicket, status: ExecStatus) -> ExecutionRecord {
    let now = Utc::now();
    ExecutionRecord {
        run_id: ticket.run_id,
        script: ticket.script.clone(),
        trigger: ticket.trigger.clone(),
        started_at: now,
        finished_at: now,
        status,
        exit_code: match status {
            ExecStatus::Success => Some(0),
            ExecStatus::Failure => Some(1),
            ExecStatus::Timeout | ExecStatus::Crashed => None,
        },
        output: format!("fake run of {}", ticket.script),
        truncated: false,
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    /// Report every run finished right away.
    Complete(ExecStatus),
    /// Keep runs in flight until the test finishes them.
    Hold,
}

/// Test-side view of what a [`FakeExecutor`] was asked to do.
#[derive(Debug, Clone)]
pub struct FakeRuns {
    intake_tx: mpsc::Sender<DispatchEvent>,
    spawned: Arc<Mutex<Vec<RunTicket>>>,
    held: Arc<Mutex<Vec<RunTicket>>>,
    cancelled: Arc<Mutex<bool>>,
}

impl FakeRuns {
    /// Every ticket handed to the executor, in order.
    pub fn spawned(&self) -> Vec<RunTicket> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn spawned_scripts(&self) -> Vec<String> {
        self.spawned().into_iter().map(|t| t.script).collect()
    }

    pub fn held(&self) -> Vec<RunTicket> {
        self.held.lock().unwrap().clone()
    }

    pub fn was_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap()
    }

    /// Report a held run as finished. Returns `false` if it was not held.
    pub async fn finish(&self, run_id: RunId, status: ExecStatus) -> bool {
        let ticket = {
            let mut held = self.held.lock().unwrap();
            let Some(pos) = held.iter().position(|t| t.run_id == run_id) else {
                return false;
            };
            held.remove(pos)
        };
        self.intake_tx
            .send(DispatchEvent::RunFinished(record_for(&ticket, status)))
            .await
            .is_ok()
    }
}

/// Executor backend that never starts a process.
pub struct FakeExecutor {
    mode: Mode,
    runs: FakeRuns,
}

impl FakeExecutor {
    /// Every run finishes immediately with `status`.
    pub fn completing(intake_tx: mpsc::Sender<DispatchEvent>, status: ExecStatus) -> (Self, FakeRuns) {
        Self::with_mode(intake_tx, Mode::Complete(status))
    }

    /// Runs stay in flight until [`FakeRuns::finish`] or `cancel_all`.
    pub fn holding(intake_tx: mpsc::Sender<DispatchEvent>) -> (Self, FakeRuns) {
        Self::with_mode(intake_tx, Mode::Hold)
    }

    fn with_mode(intake_tx: mpsc::Sender<DispatchEvent>, mode: Mode) -> (Self, FakeRuns) {
        let runs = FakeRuns {
            intake_tx,
            spawned: Arc::new(Mutex::new(Vec::new())),
            held: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(false)),
        };
        (
            Self {
                mode,
                runs: runs.clone(),
            },
            runs,
        )
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_run(
        &mut self,
        ticket: RunTicket,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let runs = self.runs.clone();
        let mode = self.mode;

        Box::pin(async move {
            runs.spawned.lock().unwrap().push(ticket.clone());
            match mode {
                Mode::Complete(status) => {
                    // Report from a separate task: the dispatcher is the one
                    // awaiting this future and also the intake's only reader.
                    let tx = runs.intake_tx.clone();
                    tokio::spawn(async move {
                        let _ = tx
                            .send(DispatchEvent::RunFinished(record_for(&ticket, status)))
                            .await;
                    });
                }
                Mode::Hold => runs.held.lock().unwrap().push(ticket),
            }
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let runs = self.runs.clone();

        Box::pin(async move {
            *runs.cancelled.lock().unwrap() = true;
            let held: Vec<RunTicket> = runs.held.lock().unwrap().drain(..).collect();
            for ticket in held {
                let tx = runs.intake_tx.clone();
                tokio::spawn(async move {
                    let _ = tx
                        .send(DispatchEvent::RunFinished(record_for(&ticket, ExecStatus::Crashed)))
                        .await;
                });
            }
            Ok(())
        })
    }
}
