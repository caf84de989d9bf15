// src/engine/handlers.rs

//! Per-event logic of the dispatcher core.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::errors::ScriptdError;
use crate::exec::{ExecutionRecord, RunTicket};
use crate::triggers::Trigger;

use super::core::DispatcherCore;
use super::{ControlRequest, Diagnostic, DiagnosticKind, FireIntent, FireOrigin, RunOutcome};

/// Command produced by the pure core, to be executed by the IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    /// Hand an admitted run to the executor backend.
    Spawn(RunTicket),
    /// The trigger set changed; producers must see this snapshot.
    PublishTriggers(Arc<Vec<Trigger>>),
    /// Stop producers and start the shutdown grace period.
    BeginShutdown,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer loop should keep running.
    pub keep_running: bool,
}

/// Handle a fire intent from the clock or the event watcher.
///
/// The trigger is looked up again: intents for triggers that were removed
/// or disabled after the producer saw them are dropped. Busy scripts drop
/// the fire; nothing is queued.
pub fn handle_fire(core: &mut DispatcherCore, intent: FireIntent, now: DateTime<Utc>) -> CoreStep {
    if core.shutting_down {
        debug!(trigger = %intent.trigger, "shutting down; fire ignored");
        return core.idle_step();
    }

    let Some(trigger) = core.store.get(&intent.trigger).cloned() else {
        debug!(trigger = %intent.trigger, "fire for unknown trigger ignored");
        return core.idle_step();
    };
    if !trigger.enabled {
        debug!(trigger = %trigger.id, "fire for disabled trigger ignored");
        return core.idle_step();
    }

    if intent.origin == FireOrigin::Schedule && trigger.is_schedule() {
        if let Err(err) = core.store.record_fire(&trigger.id, intent.next_fire) {
            core.push_diagnostic(Diagnostic::new(
                DiagnosticKind::PersistFailed,
                format!("could not persist next fire of trigger '{}': {err}", trigger.id),
            ));
        }
    }

    let script = trigger.script.as_str();
    match core.registry.get(script).map(|s| s.enabled) {
        Err(_) => {
            core.push_diagnostic(Diagnostic::new(
                DiagnosticKind::UnresolvedScript,
                format!("trigger '{}' targets unknown script '{script}'", trigger.id),
            ));
            return core.idle_step();
        }
        Ok(false) => {
            core.push_diagnostic(Diagnostic::new(
                DiagnosticKind::ScriptDisabled,
                format!("trigger '{}' fired but script '{script}' is disabled", trigger.id),
            ));
            return core.idle_step();
        }
        Ok(true) => {}
    }

    let mut commands = Vec::new();
    match core
        .supervisor
        .admit(&core.registry, script, Some(&trigger.id), now)
    {
        Ok(ticket) => {
            info!(trigger = %trigger.id, script, run_id = ticket.run_id, origin = ?intent.origin, "trigger fired");
            commands.push(CoreCommand::Spawn(ticket));
        }
        Err(ScriptdError::Busy(reason)) => {
            core.push_diagnostic(Diagnostic::new(
                DiagnosticKind::BusyDropped,
                format!("fire of trigger '{}' dropped: {reason}", trigger.id),
            ));
        }
        Err(err @ ScriptdError::NotFound { .. }) => {
            core.push_diagnostic(Diagnostic::new(
                DiagnosticKind::UnresolvedScript,
                format!("trigger '{}': {err}", trigger.id),
            ));
        }
        Err(err) => {
            core.push_diagnostic(Diagnostic::new(
                DiagnosticKind::RegistryFailed,
                format!("trigger '{}': resolving script '{script}' failed: {err}", trigger.id),
            ));
        }
    }

    CoreStep {
        commands,
        keep_running: core.keep_running(),
    }
}

/// Manual runs are not dropped silently: `Busy` and `NotFound` go back to
/// the caller. Disabled scripts can still be run by hand.
pub fn handle_run_manual(
    core: &mut DispatcherCore,
    script: &str,
    now: DateTime<Utc>,
) -> (RunOutcome, Option<RunTicket>) {
    if core.shutting_down {
        return (
            RunOutcome::Busy {
                reason: "daemon is shutting down".to_string(),
            },
            None,
        );
    }

    match core.supervisor.admit(&core.registry, script, None, now) {
        Ok(ticket) => {
            info!(script, run_id = ticket.run_id, "manual run started");
            (
                RunOutcome::Started {
                    run_id: ticket.run_id,
                },
                Some(ticket),
            )
        }
        Err(ScriptdError::Busy(reason)) => {
            debug!(script, %reason, "manual run refused");
            (RunOutcome::Busy { reason }, None)
        }
        Err(ScriptdError::NotFound { .. }) => (RunOutcome::NotFound, None),
        Err(err) => {
            warn!(script, error = %err, "manual run could not resolve script");
            (RunOutcome::NotFound, None)
        }
    }
}

pub fn handle_run_finished(core: &mut DispatcherCore, record: ExecutionRecord) -> CoreStep {
    let script = record.script.clone();
    let run_id = record.run_id;
    if !core.supervisor.complete(record) {
        warn!(script = %script, run_id, "completion for a run that was not in flight");
    }
    core.idle_step()
}

/// Re-scan the scripts directory after a change notification.
pub fn handle_refresh(core: &mut DispatcherCore) -> CoreStep {
    if let Err(err) = core.registry.refresh() {
        core.push_diagnostic(Diagnostic::new(
            DiagnosticKind::RegistryFailed,
            format!("refreshing scripts failed: {err}"),
        ));
    }
    core.idle_step()
}

pub fn handle_shutdown(core: &mut DispatcherCore) -> CoreStep {
    if core.shutting_down {
        return core.idle_step();
    }
    core.shutting_down = true;
    info!(in_flight = core.supervisor.in_flight(), "shutdown requested");
    CoreStep {
        commands: vec![CoreCommand::BeginShutdown],
        keep_running: core.keep_running(),
    }
}

pub fn handle_control(
    core: &mut DispatcherCore,
    request: ControlRequest,
    now: DateTime<Utc>,
) -> CoreStep {
    let mut commands = Vec::new();

    match request {
        ControlRequest::AddTrigger { trigger, reply } => {
            let res = core.store.add(trigger, now);
            if res.is_ok() {
                commands.push(CoreCommand::PublishTriggers(core.triggers_snapshot()));
            }
            let _ = reply.send(res);
        }
        ControlRequest::RemoveTrigger { id, reply } => {
            let res = core.store.remove(&id);
            if res.is_ok() {
                commands.push(CoreCommand::PublishTriggers(core.triggers_snapshot()));
            }
            let _ = reply.send(res);
        }
        ControlRequest::UpdateTrigger { id, patch, reply } => {
            let res = core.store.update(&id, patch, now);
            if res.is_ok() {
                commands.push(CoreCommand::PublishTriggers(core.triggers_snapshot()));
            }
            let _ = reply.send(res);
        }
        ControlRequest::ListTriggers { reply } => {
            let _ = reply.send(core.store.list());
        }
        ControlRequest::ListScripts { reply } => {
            let _ = reply.send(core.registry.list());
        }
        ControlRequest::RefreshScripts { reply } => {
            let _ = reply.send(core.registry.refresh());
        }
        ControlRequest::SetScriptEnabled {
            script,
            enabled,
            reply,
        } => {
            let _ = reply.send(core.registry.set_enabled(&script, enabled));
        }
        ControlRequest::RunManual { script, reply } => {
            let (outcome, ticket) = handle_run_manual(core, &script, now);
            if let Some(ticket) = ticket {
                commands.push(CoreCommand::Spawn(ticket));
            }
            let _ = reply.send(outcome);
        }
        ControlRequest::LastRecord { script, reply } => {
            let _ = reply.send(core.supervisor.last_record(&script).cloned());
        }
        ControlRequest::Snapshot { reply } => {
            let _ = reply.send(core.snapshot());
        }
    }

    CoreStep {
        commands,
        keep_running: core.keep_running(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{FixedOffset, TimeDelta, TimeZone};
    use tokio::sync::oneshot;

    use super::*;
    use crate::engine::{DispatchEvent, DIAGNOSTICS_CAPACITY};
    use crate::exec::{ExecStatus, Supervisor};
    use crate::fs::mock::MockFileSystem;
    use crate::fs::FileSystem;
    use crate::registry::{DirScriptStore, ScriptRegistry};
    use crate::triggers::{EdgeCondition, NewTrigger, Recurrence, TriggerStore};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
    }

    fn core_with(scripts: &[&str], max_concurrent: usize) -> (DispatcherCore, MockFileSystem) {
        let fs = MockFileSystem::new();
        fs.add_dir("/scripts");
        for s in scripts {
            fs.add_file(format!("/scripts/{s}.sh"), "#!/bin/sh\n");
        }
        let shared: Arc<dyn FileSystem> = Arc::new(fs.clone());
        let registry =
            ScriptRegistry::load(Arc::new(DirScriptStore::new("/scripts", shared.clone()))).unwrap();
        let store = TriggerStore::new(
            PathBuf::from("/state/triggers.toml"),
            shared,
            FixedOffset::east_opt(0).unwrap(),
        );
        let core = DispatcherCore::new(registry, store, Supervisor::new(max_concurrent));
        (core, fs)
    }

    fn add(core: &mut DispatcherCore, trigger: NewTrigger) -> Trigger {
        let (tx, mut rx) = oneshot::channel();
        let step = core.step(
            DispatchEvent::Control(ControlRequest::AddTrigger { trigger, reply: tx }),
            now(),
        );
        assert!(matches!(
            step.commands.as_slice(),
            [CoreCommand::PublishTriggers(_)]
        ));
        rx.try_recv().unwrap().unwrap()
    }

    fn manual(core: &mut DispatcherCore, script: &str) -> (RunOutcome, CoreStep) {
        let (tx, mut rx) = oneshot::channel();
        let step = core.step(
            DispatchEvent::Control(ControlRequest::RunManual {
                script: script.into(),
                reply: tx,
            }),
            now(),
        );
        (rx.try_recv().unwrap(), step)
    }

    fn fire(trigger: &Trigger, origin: FireOrigin) -> DispatchEvent {
        DispatchEvent::Fire(FireIntent {
            trigger: trigger.id.clone(),
            script: trigger.script.clone(),
            origin,
            at: now(),
            next_fire: Some(now() + TimeDelta::seconds(60)),
        })
    }

    fn finished(ticket: &RunTicket) -> DispatchEvent {
        DispatchEvent::RunFinished(ExecutionRecord {
            run_id: ticket.run_id,
            script: ticket.script.clone(),
            trigger: ticket.trigger.clone(),
            started_at: now(),
            finished_at: now(),
            status: ExecStatus::Success,
            exit_code: Some(0),
            output: "ok".into(),
            truncated: false,
        })
    }

    fn spawned(step: &CoreStep) -> Vec<RunTicket> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Spawn(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn schedule_fire_spawns_and_persists_next_fire() {
        let (mut core, fs) = core_with(&["lights"], 4);
        let t = add(
            &mut core,
            NewTrigger::schedule("lights", Recurrence::every(60)).with_id("t1"),
        );

        let step = core.step(fire(&t, FireOrigin::Schedule), now());
        let tickets = spawned(&step);
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].trigger.as_deref(), Some("t1"));
        assert_eq!(
            core.store().get("t1").and_then(|t| t.next_fire()),
            Some(now() + TimeDelta::seconds(60))
        );
        let persisted = fs
            .read_to_string(std::path::Path::new("/state/triggers.toml"))
            .unwrap();
        assert!(persisted.contains("next_fire"));
    }

    #[test]
    fn disabled_trigger_never_executes() {
        let (mut core, _fs) = core_with(&["lights"], 4);
        let t = add(
            &mut core,
            NewTrigger::event("lights", "D1", None, EdgeCondition::AnyChange)
                .with_id("t1")
                .disabled(),
        );

        let step = core.step(fire(&t, FireOrigin::Event), now());
        assert!(step.commands.is_empty());
        assert_eq!(core.in_flight(), 0);
    }

    #[test]
    fn fire_for_removed_trigger_is_ignored() {
        let (mut core, _fs) = core_with(&["lights"], 4);
        let t = add(
            &mut core,
            NewTrigger::event("lights", "D1", None, EdgeCondition::AnyChange).with_id("t1"),
        );
        let (tx, _rx) = oneshot::channel();
        core.step(
            DispatchEvent::Control(ControlRequest::RemoveTrigger {
                id: "t1".into(),
                reply: tx,
            }),
            now(),
        );

        assert!(core.step(fire(&t, FireOrigin::Event), now()).commands.is_empty());
    }

    #[test]
    fn unknown_script_is_reported_not_executed() {
        let (mut core, _fs) = core_with(&[], 4);
        let t = add(
            &mut core,
            NewTrigger::event("ghost", "D1", None, EdgeCondition::AnyChange).with_id("t1"),
        );

        let step = core.step(fire(&t, FireOrigin::Event), now());
        assert!(step.commands.is_empty());
        let diags = core.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::UnresolvedScript);
    }

    #[test]
    fn disabled_script_skips_fires_but_allows_manual_runs() {
        let (mut core, _fs) = core_with(&["lights"], 4);
        let t = add(
            &mut core,
            NewTrigger::event("lights", "D1", None, EdgeCondition::AnyChange).with_id("t1"),
        );
        let (tx, _rx) = oneshot::channel();
        core.step(
            DispatchEvent::Control(ControlRequest::SetScriptEnabled {
                script: "lights".into(),
                enabled: false,
                reply: tx,
            }),
            now(),
        );

        let step = core.step(fire(&t, FireOrigin::Event), now());
        assert!(spawned(&step).is_empty());
        assert_eq!(core.diagnostics()[0].kind, DiagnosticKind::ScriptDisabled);

        let (outcome, step) = manual(&mut core, "lights");
        assert!(matches!(outcome, RunOutcome::Started { .. }));
        assert_eq!(spawned(&step).len(), 1);
    }

    #[test]
    fn busy_fire_is_dropped_and_manual_busy_is_reported() {
        let (mut core, _fs) = core_with(&["lights"], 4);
        let t = add(
            &mut core,
            NewTrigger::event("lights", "D1", None, EdgeCondition::AnyChange).with_id("t1"),
        );

        let first = spawned(&core.step(fire(&t, FireOrigin::Event), now()));
        assert_eq!(first.len(), 1);

        assert!(spawned(&core.step(fire(&t, FireOrigin::Event), now())).is_empty());
        assert_eq!(core.diagnostics()[0].kind, DiagnosticKind::BusyDropped);

        let (outcome, _) = manual(&mut core, "lights");
        assert!(matches!(outcome, RunOutcome::Busy { .. }));

        core.step(finished(&first[0]), now());
        let (outcome, _) = manual(&mut core, "lights");
        assert!(matches!(outcome, RunOutcome::Started { .. }));
    }

    #[test]
    fn manual_run_of_unknown_script_is_not_found() {
        let (mut core, _fs) = core_with(&["lights"], 4);
        let (outcome, step) = manual(&mut core, "nope");
        assert_eq!(outcome, RunOutcome::NotFound);
        assert!(step.commands.is_empty());
    }

    #[test]
    fn shutdown_waits_for_in_flight_runs() {
        let (mut core, _fs) = core_with(&["a"], 4);
        let (_, step) = manual(&mut core, "a");
        let ticket = spawned(&step).remove(0);

        let step = core.step(DispatchEvent::ShutdownRequested, now());
        assert_eq!(step.commands, vec![CoreCommand::BeginShutdown]);
        assert!(step.keep_running);

        let (outcome, _) = manual(&mut core, "a");
        assert!(matches!(outcome, RunOutcome::Busy { .. }));

        let step = core.step(finished(&ticket), now());
        assert!(!step.keep_running);
        assert_eq!(
            core.supervisor().last_record("a").map(|r| r.run_id),
            Some(ticket.run_id)
        );
    }

    #[test]
    fn shutdown_with_nothing_running_stops_immediately() {
        let (mut core, _fs) = core_with(&[], 4);
        let step = core.step(DispatchEvent::ShutdownRequested, now());
        assert!(!step.keep_running);
    }

    #[test]
    fn diagnostics_ring_is_bounded() {
        let (mut core, _fs) = core_with(&[], 4);
        for i in 0..DIAGNOSTICS_CAPACITY + 10 {
            core.step(
                DispatchEvent::Diagnostic(Diagnostic::new(
                    DiagnosticKind::ConnectionLost,
                    format!("lost {i}"),
                )),
                now(),
            );
        }
        let diags = core.diagnostics();
        assert_eq!(diags.len(), DIAGNOSTICS_CAPACITY);
        assert_eq!(diags[0].message, "lost 10");
    }

    #[test]
    fn invalid_trigger_is_rejected_without_publishing() {
        let (mut core, _fs) = core_with(&["a"], 4);
        let (tx, mut rx) = oneshot::channel();
        let step = core.step(
            DispatchEvent::Control(ControlRequest::AddTrigger {
                trigger: NewTrigger::event("a", "", None, EdgeCondition::AnyChange),
                reply: tx,
            }),
            now(),
        );
        assert!(step.commands.is_empty());
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ScriptdError::InvalidTrigger(_))
        ));
        assert!(core.store().is_empty());
    }
}
