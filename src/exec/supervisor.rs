// src/exec/supervisor.rs

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{Result, ScriptdError};
use crate::registry::ScriptRegistry;
use crate::types::{ScriptId, TriggerId};

use super::{ExecutionRecord, RunId, RunTicket};

/// An admitted execution that has not reported back yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningRun {
    pub run_id: RunId,
    pub script: ScriptId,
    pub trigger: Option<TriggerId>,
    pub admitted_at: DateTime<Utc>,
}

/// Admission control and execution bookkeeping.
///
/// Enforces at most one in-flight execution per script and at most
/// `max_concurrent` in total. Pure state: spawning the admitted run is the
/// caller's job, and the run must come back through
/// [`complete`](Self::complete).
#[derive(Debug)]
pub struct Supervisor {
    max_concurrent: usize,
    last_run_id: RunId,
    running: BTreeMap<ScriptId, RunningRun>,
    last: HashMap<ScriptId, ExecutionRecord>,
}

impl Supervisor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            last_run_id: 0,
            running: BTreeMap::new(),
            last: HashMap::new(),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Admit an execution of `script` or explain why not.
    ///
    /// - `NotFound` if the registry cannot resolve the script.
    /// - `Busy` if the script is already running or the global cap is hit.
    pub fn admit(
        &mut self,
        registry: &ScriptRegistry,
        script: &str,
        trigger: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RunTicket> {
        let path = registry.resolve_executable(script)?;

        if let Some(active) = self.running.get(script) {
            return Err(ScriptdError::Busy(format!(
                "script '{script}' is already running (run {})",
                active.run_id
            )));
        }
        if self.running.len() >= self.max_concurrent {
            return Err(ScriptdError::Busy(format!(
                "concurrency cap of {} reached",
                self.max_concurrent
            )));
        }

        self.last_run_id += 1;
        let run_id = self.last_run_id;
        self.running.insert(
            script.to_string(),
            RunningRun {
                run_id,
                script: script.to_string(),
                trigger: trigger.map(str::to_string),
                admitted_at: now,
            },
        );
        debug!(script, run_id, in_flight = self.running.len(), "execution admitted");

        Ok(RunTicket {
            run_id,
            script: script.to_string(),
            trigger: trigger.map(str::to_string),
            path,
        })
    }

    /// Release the slot held by `record`'s run and keep the record as the
    /// script's latest. Returns `false` if the run was not in flight.
    pub fn complete(&mut self, record: ExecutionRecord) -> bool {
        let tracked = self
            .running
            .get(&record.script)
            .is_some_and(|r| r.run_id == record.run_id);
        if tracked {
            self.running.remove(&record.script);
        }

        info!(
            script = %record.script,
            run_id = record.run_id,
            status = %record.status,
            exit_code = ?record.exit_code,
            truncated = record.truncated,
            "execution finished"
        );

        let newer = self
            .last
            .get(&record.script)
            .is_none_or(|prev| prev.run_id <= record.run_id);
        if newer {
            self.last.insert(record.script.clone(), record);
        }
        tracked
    }

    /// Latest finished execution of `script`.
    pub fn last_record(&self, script: &str) -> Option<&ExecutionRecord> {
        self.last.get(script)
    }

    /// Latest record of every script that has run, ordered by script.
    pub fn records(&self) -> Vec<ExecutionRecord> {
        let mut records: Vec<_> = self.last.values().cloned().collect();
        records.sort_by(|a, b| a.script.cmp(&b.script));
        records
    }

    pub fn running(&self) -> Vec<RunningRun> {
        self.running.values().cloned().collect()
    }

    pub fn is_running(&self, script: &str) -> bool {
        self.running.contains_key(script)
    }

    pub fn in_flight(&self) -> usize {
        self.running.len()
    }
}
