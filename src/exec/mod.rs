// src/exec/mod.rs

//! Execution supervisor.
//!
//! - [`supervisor`] holds admission state: which scripts are running, the
//!   global concurrency cap and the last execution record per script. It is
//!   owned by the dispatcher and never touched concurrently.
//! - [`runner`] runs one script process with a timeout and bounded output
//!   capture, producing an [`ExecutionRecord`].
//! - [`output`] is the bounded stdout/stderr buffer.
//! - [`backend`] provides the `ExecutorBackend` trait and the process-backed
//!   implementation used in production; tests substitute a fake.

pub mod backend;
pub mod output;
pub mod runner;
pub mod supervisor;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ExecConfig;
use crate::types::{ScriptId, TriggerId};

pub use backend::{ExecutorBackend, ProcessBackend};
pub use output::BoundedOutput;
pub use runner::run_script;
pub use supervisor::{RunningRun, Supervisor};

/// Monotonically increasing execution identifier.
pub type RunId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Success,
    Failure,
    Timeout,
    Crashed,
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecStatus::Success => "success",
            ExecStatus::Failure => "failure",
            ExecStatus::Timeout => "timeout",
            ExecStatus::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Outcome of one script execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRecord {
    pub run_id: RunId,
    pub script: ScriptId,
    /// `None` for manual runs.
    pub trigger: Option<TriggerId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: ExecStatus,
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr, capped at the configured limit.
    pub output: String,
    pub truncated: bool,
}

/// An admitted execution, ready to be spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTicket {
    pub run_id: RunId,
    pub script: ScriptId,
    pub trigger: Option<TriggerId>,
    pub path: PathBuf,
}

/// Per-process limits and launch settings.
#[derive(Debug, Clone)]
pub struct ExecLimits {
    pub timeout: Duration,
    pub output_limit: usize,
    pub interpreter: Option<String>,
    pub interpreter_args: Vec<String>,
}

impl From<&ExecConfig> for ExecLimits {
    fn from(cfg: &ExecConfig) -> Self {
        Self {
            timeout: cfg.timeout,
            output_limit: cfg.output_limit,
            interpreter: cfg.interpreter.clone(),
            interpreter_args: cfg.interpreter_args.clone(),
        }
    }
}
