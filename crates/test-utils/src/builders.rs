use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use scriptd::engine::{
    DispatchEvent, DispatcherCore, DispatcherHandle, Runtime, RuntimeOptions,
};
use scriptd::errors::Result;
use scriptd::exec::{ExecutorBackend, Supervisor};
use scriptd::fs::mock::MockFileSystem;
use scriptd::fs::{FileSystem, RealFileSystem};
use scriptd::registry::{DirScriptStore, ScriptRegistry};
use scriptd::triggers::{EdgeCondition, NewTrigger, Recurrence, Trigger, TriggerStore};

pub fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).expect("zero offset")
}

/// `NewTrigger` for an interval schedule with a fixed id.
pub fn every(id: &str, script: &str, secs: u64) -> NewTrigger {
    NewTrigger::schedule(script, Recurrence::every(secs)).with_id(id)
}

/// `NewTrigger` for an event trigger with a fixed id.
pub fn on_event(
    id: &str,
    script: &str,
    device: &str,
    key: Option<&str>,
    condition: EdgeCondition,
) -> NewTrigger {
    NewTrigger::event(script, device, key, condition).with_id(id)
}

pub fn value_equals(value: &str) -> EdgeCondition {
    EdgeCondition::ValueEquals {
        value: value.to_string(),
    }
}

/// Dispatcher core over an in-memory filesystem holding one file per
/// script under `/scripts` and the trigger file at `/state/triggers.toml`.
pub fn mock_core(scripts: &[&str], max_concurrent: usize) -> (DispatcherCore, MockFileSystem) {
    let fs = MockFileSystem::new();
    fs.add_dir("/scripts");
    for script in scripts {
        fs.add_file(format!("/scripts/{script}.sh"), "#!/bin/sh\n");
    }
    let shared: Arc<dyn FileSystem> = Arc::new(fs.clone());
    let registry = ScriptRegistry::load(Arc::new(DirScriptStore::new("/scripts", shared.clone())))
        .expect("mock registry");
    let store = TriggerStore::new("/state/triggers.toml", shared, utc());
    (
        DispatcherCore::new(registry, store, Supervisor::new(max_concurrent)),
        fs,
    )
}

/// Dispatcher core over real directories.
pub fn dir_core(scripts_dir: &Path, triggers_file: &Path, max_concurrent: usize) -> DispatcherCore {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let registry = ScriptRegistry::load(Arc::new(DirScriptStore::new(scripts_dir, fs.clone())))
        .expect("registry");
    let store = TriggerStore::new(triggers_file, fs, utc());
    DispatcherCore::new(registry, store, Supervisor::new(max_concurrent))
}

/// A dispatcher runtime running on the current Tokio runtime.
pub struct TestDispatcher {
    pub handle: DispatcherHandle,
    pub intake_tx: mpsc::Sender<DispatchEvent>,
    pub triggers_rx: watch::Receiver<Arc<Vec<Trigger>>>,
    pub shutdown_rx: watch::Receiver<bool>,
    pub join: JoinHandle<Result<DispatcherCore>>,
}

/// Spawn `core` behind a runtime whose backend is built by `executor`
/// from the intake sender.
pub fn spawn_dispatcher<E, F>(core: DispatcherCore, grace: Duration, executor: F) -> TestDispatcher
where
    E: ExecutorBackend + 'static,
    F: FnOnce(mpsc::Sender<DispatchEvent>) -> E,
{
    let (intake_tx, intake_rx) = mpsc::channel(scriptd::INTAKE_CAPACITY);
    let (triggers_tx, triggers_rx) = watch::channel(core.triggers_snapshot());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let backend = executor(intake_tx.clone());
    let runtime = Runtime::new(
        core,
        intake_rx,
        backend,
        triggers_tx,
        shutdown_tx,
        RuntimeOptions {
            shutdown_grace: grace,
        },
    );
    let join = tokio::spawn(runtime.run());

    TestDispatcher {
        handle: DispatcherHandle::new(intake_tx.clone()),
        intake_tx,
        triggers_rx,
        shutdown_rx,
        join,
    }
}
