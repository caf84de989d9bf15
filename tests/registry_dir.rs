// tests/registry_dir.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use scriptd::engine::DispatchEvent;
use scriptd::errors::ScriptdError;
use scriptd::fs::RealFileSystem;
use scriptd::registry::{spawn_scripts_watcher, DirScriptStore, ScriptRegistry};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use crate::common::{init_tracing, with_timeout, write_script};

fn registry(dir: &TempDir) -> ScriptRegistry {
    let store = DirScriptStore::new(dir.path(), Arc::new(RealFileSystem));
    ScriptRegistry::load(Arc::new(store)).unwrap()
}

#[test]
fn lists_scripts_by_file_stem_and_ignores_noise() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "lights.sh", "#!/bin/sh\n");
    write_script(dir.path(), "backup", "#!/bin/sh\n");
    write_script(dir.path(), ".hidden.sh", "#!/bin/sh\n");
    write_script(dir.path(), "lights.sh~", "#!/bin/sh\n");
    std::fs::create_dir(dir.path().join("subdir")).unwrap();

    let reg = registry(&dir);
    let ids: Vec<_> = reg.list().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["backup", "lights"]);
    assert_eq!(reg.get("lights").unwrap().path, dir.path().join("lights.sh"));
}

#[test]
fn get_unknown_is_not_found() {
    let dir = TempDir::new().unwrap();
    let reg = registry(&dir);
    assert!(matches!(
        reg.get("nope"),
        Err(ScriptdError::NotFound { .. })
    ));
}

#[test]
fn refresh_reconciles_and_keeps_enabled_flag() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "a.sh", "#!/bin/sh\n");
    write_script(dir.path(), "b.sh", "#!/bin/sh\n");

    let mut reg = registry(&dir);
    reg.set_enabled("a", false).unwrap();

    std::fs::remove_file(dir.path().join("b.sh")).unwrap();
    write_script(dir.path(), "c.sh", "#!/bin/sh\n");

    let summary = reg.refresh().unwrap();
    assert_eq!(summary.added, vec!["c".to_string()]);
    assert_eq!(summary.removed, vec!["b".to_string()]);
    assert!(!reg.get("a").unwrap().enabled);
    assert!(reg.get("c").unwrap().enabled);
}

#[test]
fn vanished_file_fails_resolution_before_refresh() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "a.sh", "#!/bin/sh\n");
    let reg = registry(&dir);

    std::fs::remove_file(dir.path().join("a.sh")).unwrap();
    assert!(reg.get("a").is_ok());
    assert!(matches!(
        reg.resolve_executable("a"),
        Err(ScriptdError::NotFound { .. })
    ));
}

#[tokio::test]
async fn directory_watcher_requests_refresh_and_survives_its_loop_stopping() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let (intake_tx, mut intake_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = spawn_scripts_watcher(dir.path(), intake_tx, shutdown_rx).unwrap();

    write_script(dir.path(), "new.sh", "#!/bin/sh\n");
    let event = with_timeout(intake_rx.recv()).await;
    assert!(matches!(event, Some(DispatchEvent::RefreshScripts)));

    shutdown_tx.send_replace(true);
    // The loop drops its sender on the way out.
    assert!(with_timeout(intake_rx.recv()).await.is_none());

    // Events arriving after the loop is gone are dropped quietly.
    write_script(dir.path(), "late.sh", "#!/bin/sh\n");
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(watcher);
}
