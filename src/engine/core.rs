// src/engine/core.rs

//! Pure dispatcher state machine.
//!
//! [`DispatcherCore`] consumes [`DispatchEvent`]s and produces:
//! - updated registry, trigger store and supervisor state
//! - a list of commands describing what the IO shell should do next
//!
//! It owns no channels or processes and performs no IO apart from trigger
//! persistence and script directory scans through the injected stores, so it
//! can be driven step by step in unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::exec::{ExecutionRecord, Supervisor};
use crate::registry::ScriptRegistry;
use crate::triggers::{Trigger, TriggerStore};

use super::handlers::{
    handle_control, handle_fire, handle_refresh, handle_run_finished, handle_shutdown, CoreStep,
};
use super::{DispatchEvent, Diagnostic, Snapshot};

/// Number of diagnostics kept for the snapshot.
pub const DIAGNOSTICS_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct DispatcherCore {
    pub(super) registry: ScriptRegistry,
    pub(super) store: TriggerStore,
    pub(super) supervisor: Supervisor,
    pub(super) diagnostics: VecDeque<Diagnostic>,
    pub(super) shutting_down: bool,
}

impl DispatcherCore {
    pub fn new(registry: ScriptRegistry, store: TriggerStore, supervisor: Supervisor) -> Self {
        Self {
            registry,
            store,
            supervisor,
            diagnostics: VecDeque::with_capacity(DIAGNOSTICS_CAPACITY),
            shutting_down: false,
        }
    }

    /// Handle a single event, returning the commands for the IO shell.
    pub fn step(&mut self, event: DispatchEvent, now: DateTime<Utc>) -> CoreStep {
        match event {
            DispatchEvent::Fire(intent) => handle_fire(self, intent, now),
            DispatchEvent::RunFinished(record) => handle_run_finished(self, record),
            DispatchEvent::Control(request) => handle_control(self, request, now),
            DispatchEvent::RefreshScripts => handle_refresh(self),
            DispatchEvent::Diagnostic(diagnostic) => {
                self.push_diagnostic(diagnostic);
                self.idle_step()
            }
            DispatchEvent::ShutdownRequested => handle_shutdown(self),
        }
    }

    /// Record a run that never reached the backend.
    pub fn complete_run(&mut self, record: ExecutionRecord) {
        self.supervisor.complete(record);
    }

    pub fn triggers_snapshot(&self) -> Arc<Vec<Trigger>> {
        Arc::new(self.store.list())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            scripts: self.registry.list(),
            triggers: self.store.list(),
            records: self.supervisor.records(),
            running: self.supervisor.running(),
            diagnostics: self.diagnostics(),
        }
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    pub fn store(&self) -> &TriggerStore {
        &self.store
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.iter().cloned().collect()
    }

    pub fn in_flight(&self) -> usize {
        self.supervisor.in_flight()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub(super) fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        warn!(kind = ?diagnostic.kind, "{}", diagnostic.message);
        if self.diagnostics.len() == DIAGNOSTICS_CAPACITY {
            self.diagnostics.pop_front();
        }
        self.diagnostics.push_back(diagnostic);
    }

    /// Step with no commands. Once shutdown has begun, the loop stops as
    /// soon as nothing is in flight.
    pub(super) fn idle_step(&self) -> CoreStep {
        CoreStep {
            commands: Vec::new(),
            keep_running: self.keep_running(),
        }
    }

    pub(super) fn keep_running(&self) -> bool {
        !self.shutting_down || self.supervisor.in_flight() > 0
    }
}
