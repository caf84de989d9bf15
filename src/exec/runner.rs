// src/exec/runner.rs

//! Single script process runner.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::shutdown_requested;

use super::output::BoundedOutput;
use super::{ExecLimits, ExecStatus, ExecutionRecord, RunTicket};

/// How long to keep reading output after the process is gone. Background
/// children that inherited the pipes must not hold the record hostage.
const DRAIN_WINDOW: Duration = Duration::from_millis(250);

type SharedOutput = Arc<Mutex<BoundedOutput>>;

enum Ending {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut,
    Cancelled,
}

/// Run one script to completion and describe what happened.
///
/// Never fails: spawn errors and cancellations become `crashed` records,
/// an expired timeout kills the script's process group and records `timeout`. `cancel`
/// flipping to `true` kills the process (daemon shutdown).
pub async fn run_script(
    ticket: RunTicket,
    limits: &ExecLimits,
    mut cancel: watch::Receiver<bool>,
) -> ExecutionRecord {
    let started_at = Utc::now();
    info!(
        script = %ticket.script,
        trigger = ?ticket.trigger,
        run_id = ticket.run_id,
        path = ?ticket.path,
        "starting script"
    );

    let mut cmd = build_command(&ticket, limits);
    let mut child = match cmd.spawn().with_context(|| format!("spawning {:?}", ticket.path)) {
        Ok(child) => child,
        Err(err) => {
            warn!(script = %ticket.script, run_id = ticket.run_id, error = %err, "script failed to start");
            return record(
                &ticket,
                started_at,
                ExecStatus::Crashed,
                None,
                format!("[failed to start: {err:#}]"),
                false,
            );
        }
    };

    // The child leads its own process group, so its pid is the group id.
    let pgid = child.id();

    let output: SharedOutput = Arc::new(Mutex::new(BoundedOutput::new(limits.output_limit)));
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Arc::clone(&output)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Arc::clone(&output)));
    }

    let ending = tokio::select! {
        res = child.wait() => match res {
            Ok(status) => Ending::Exited(status),
            Err(err) => Ending::WaitFailed(err),
        },
        _ = tokio::time::sleep(limits.timeout) => Ending::TimedOut,
        _ = shutdown_requested(&mut cancel) => Ending::Cancelled,
    };

    if matches!(ending, Ending::TimedOut | Ending::Cancelled) {
        if let Some(pgid) = pgid {
            if let Err(err) = kill_process_group(pgid) {
                debug!(script = %ticket.script, run_id = ticket.run_id, error = %err, "could not signal process group");
            }
        }
        if let Err(err) = child.kill().await {
            warn!(script = %ticket.script, run_id = ticket.run_id, error = %err, "failed to kill script process");
        }
    }

    let drained = tokio::time::timeout(DRAIN_WINDOW, async {
        for reader in readers.iter_mut() {
            let _ = reader.await;
        }
    })
    .await;
    if drained.is_err() {
        debug!(script = %ticket.script, run_id = ticket.run_id, "output still open after exit; abandoning it");
        for reader in &readers {
            reader.abort();
        }
    }

    let captured = {
        let mut guard = output.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, BoundedOutput::new(0))
    };
    let (mut text, truncated) = captured.finish();

    let (status, exit_code) = match ending {
        Ending::Exited(status) => classify_exit(status, &mut text),
        Ending::WaitFailed(err) => {
            append_note(&mut text, &format!("waiting for process failed: {err}"));
            (ExecStatus::Crashed, None)
        }
        Ending::TimedOut => {
            append_note(
                &mut text,
                &format!("killed after timeout of {:?}", limits.timeout),
            );
            (ExecStatus::Timeout, None)
        }
        Ending::Cancelled => {
            append_note(&mut text, "killed: daemon shutting down");
            (ExecStatus::Crashed, None)
        }
    };

    record(&ticket, started_at, status, exit_code, text, truncated)
}

fn build_command(ticket: &RunTicket, limits: &ExecLimits) -> Command {
    let path = std::path::absolute(&ticket.path).unwrap_or_else(|_| ticket.path.clone());

    let mut cmd = match &limits.interpreter {
        Some(interpreter) => {
            let mut c = Command::new(interpreter);
            c.args(&limits.interpreter_args).arg(&path);
            c
        }
        None => Command::new(&path),
    };

    if let Some(dir) = path.parent() {
        cmd.current_dir(dir);
    }

    cmd.env("SCRIPTD_SCRIPT", &ticket.script)
        .env("SCRIPTD_TRIGGER", ticket.trigger.as_deref().unwrap_or(""))
        .env("SCRIPTD_RUN_ID", ticket.run_id.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group: a Ctrl-C at the daemon's terminal reaches the
    // daemon only, and a kill can take down the script's children too.
    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

/// SIGKILL everything the script started, not just the script itself.
#[cfg(unix)]
fn kill_process_group(pgid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| std::io::Error::other(format!("process group {pgid} out of range")))?;
    // Safety: killpg only delivers a signal to the group our child leads.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) -> std::io::Result<()> {
    Ok(())
}

fn spawn_reader<R>(mut pipe: R, output: SharedOutput) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => output
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(&chunk[..n]),
            }
        }
    })
}

fn classify_exit(status: ExitStatus, text: &mut String) -> (ExecStatus, Option<i32>) {
    match status.code() {
        Some(0) => (ExecStatus::Success, Some(0)),
        Some(code) => (ExecStatus::Failure, Some(code)),
        None => {
            append_note(text, &describe_signal(status));
            (ExecStatus::Crashed, None)
        }
    }
}

#[cfg(unix)]
fn describe_signal(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(sig) => format!("terminated by signal {sig}"),
        None => "terminated without exit code".to_string(),
    }
}

#[cfg(not(unix))]
fn describe_signal(_status: ExitStatus) -> String {
    "terminated without exit code".to_string()
}

fn append_note(text: &mut String, note: &str) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push('[');
    text.push_str(note);
    text.push(']');
}

fn record(
    ticket: &RunTicket,
    started_at: DateTime<Utc>,
    status: ExecStatus,
    exit_code: Option<i32>,
    output: String,
    truncated: bool,
) -> ExecutionRecord {
    ExecutionRecord {
        run_id: ticket.run_id,
        script: ticket.script.clone(),
        trigger: ticket.trigger.clone(),
        started_at,
        finished_at: Utc::now(),
        status,
        exit_code,
        output,
        truncated,
    }
}
