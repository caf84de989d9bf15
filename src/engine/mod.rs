// src/engine/mod.rs

//! Dispatcher: the single serialized consumer of fire intents.
//!
//! The clock, the event watcher, the scripts-directory watcher, the
//! execution backend and the control surface all talk to the dispatcher by
//! sending [`DispatchEvent`]s on one ordered intake channel. All mutation of
//! the trigger store, the script registry and execution records happens in
//! response to those events, one at a time.
//!
//! The pure state machine lives in [`core`] (with the per-event logic in
//! [`handlers`]); the async/IO shell is [`runtime`]; [`handle`] is the
//! request/reply client used by the control surface.

pub mod core;
pub mod handle;
pub mod handlers;
pub mod runtime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, watch};

use crate::errors::Result;
use crate::exec::{ExecutionRecord, RunId, RunTicket, RunningRun};
use crate::registry::{RefreshSummary, Script};
use crate::triggers::{NewTrigger, Trigger, TriggerPatch};
use crate::types::{ScriptId, TriggerId};

pub use self::core::{DispatcherCore, DIAGNOSTICS_CAPACITY};
pub use handle::DispatcherHandle;
pub use handlers::{CoreCommand, CoreStep};
pub use runtime::{Runtime, RuntimeOptions};

/// Which producer emitted a fire intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FireOrigin {
    Schedule,
    Event,
}

/// "This trigger's condition is now satisfied; run its script."
#[derive(Debug, Clone, PartialEq)]
pub struct FireIntent {
    pub trigger: TriggerId,
    /// Script the producer saw; the dispatcher re-reads the trigger.
    pub script: ScriptId,
    pub origin: FireOrigin,
    /// When the condition was satisfied (the due time for schedules).
    pub at: DateTime<Utc>,
    /// Following fire time of a schedule trigger, to be persisted.
    pub next_fire: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ConnectionLost,
    UnresolvedScript,
    ScriptDisabled,
    BusyDropped,
    PersistFailed,
    RegistryFailed,
    SpawnFailed,
}

/// A non-fatal problem worth showing to an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub at: DateTime<Utc>,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind,
            message: message.into(),
        }
    }
}

/// Synchronous answer to a manual run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Started { run_id: RunId },
    Busy { reason: String },
    NotFound,
}

/// Read-only view of the dispatcher's state.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub scripts: Vec<Script>,
    pub triggers: Vec<Trigger>,
    pub records: Vec<ExecutionRecord>,
    pub running: Vec<RunningRun>,
    pub diagnostics: Vec<Diagnostic>,
}

pub type Reply<T> = oneshot::Sender<T>;

/// Control surface operations, each carrying its reply channel.
#[derive(Debug)]
pub enum ControlRequest {
    AddTrigger {
        trigger: NewTrigger,
        reply: Reply<Result<Trigger>>,
    },
    RemoveTrigger {
        id: TriggerId,
        reply: Reply<Result<Trigger>>,
    },
    UpdateTrigger {
        id: TriggerId,
        patch: TriggerPatch,
        reply: Reply<Result<Trigger>>,
    },
    ListTriggers {
        reply: Reply<Vec<Trigger>>,
    },
    ListScripts {
        reply: Reply<Vec<Script>>,
    },
    RefreshScripts {
        reply: Reply<Result<RefreshSummary>>,
    },
    SetScriptEnabled {
        script: ScriptId,
        enabled: bool,
        reply: Reply<Result<Script>>,
    },
    RunManual {
        script: ScriptId,
        reply: Reply<RunOutcome>,
    },
    LastRecord {
        script: ScriptId,
        reply: Reply<Option<ExecutionRecord>>,
    },
    Snapshot {
        reply: Reply<Snapshot>,
    },
}

/// Everything the dispatcher reacts to.
#[derive(Debug)]
pub enum DispatchEvent {
    Fire(FireIntent),
    /// An execution ended; the backend reports every admitted run once.
    RunFinished(ExecutionRecord),
    Control(ControlRequest),
    /// The scripts directory changed.
    RefreshScripts,
    Diagnostic(Diagnostic),
    /// Graceful shutdown requested (signal or control surface).
    ShutdownRequested,
}

/// A run that could not be handed to the backend is recorded as crashed.
pub(crate) fn unspawned_record(ticket: RunTicket, reason: &str) -> ExecutionRecord {
    let now = Utc::now();
    ExecutionRecord {
        run_id: ticket.run_id,
        script: ticket.script,
        trigger: ticket.trigger,
        started_at: now,
        finished_at: now,
        status: crate::exec::ExecStatus::Crashed,
        exit_code: None,
        output: format!("[failed to start: {reason}]"),
        truncated: false,
    }
}

/// Resolves once `shutdown` holds `true` or its sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
