// src/registry/watcher.rs

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::engine::{shutdown_requested, DispatchEvent};

/// Bursts of filesystem events (an editor saving, `cp -r`) are coalesced into
/// one refresh request after this quiet period.
const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Handle for the scripts directory watcher.
///
/// Keeps the underlying `RecommendedWatcher` alive; dropping it stops
/// watching.
pub struct ScriptsWatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for ScriptsWatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptsWatcherHandle").finish()
    }
}

/// Watch the scripts directory and ask the dispatcher to refresh the
/// registry whenever a file is created, removed, or renamed there.
pub fn spawn_scripts_watcher(
    dir: impl Into<PathBuf>,
    intake_tx: mpsc::Sender<DispatchEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ScriptsWatcherHandle> {
    let dir = dir.into();

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                // The receiver is gone once the loop below has stopped.
                if event_tx.send(event).is_err() {
                    debug!("scripts watcher loop gone; dropping event");
                }
            }
            Err(err) => {
                warn!(error = %err, "scripts dir watch error");
            }
        },
        Config::default(),
    )
    .context("creating scripts directory watcher")?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching scripts directory {:?}", dir))?;

    info!("scripts directory watcher started on {:?}", dir);

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                ev = event_rx.recv() => ev,
                _ = shutdown_requested(&mut shutdown) => break,
            };
            let Some(event) = event else { break };
            if !affects_listing(&event.kind) {
                continue;
            }
            debug!(?event, "scripts directory changed");

            tokio::time::sleep(SETTLE_DELAY).await;
            while event_rx.try_recv().is_ok() {}

            if intake_tx.send(DispatchEvent::RefreshScripts).await.is_err() {
                break;
            }
        }
        debug!("scripts watcher loop finished");
    });

    Ok(ScriptsWatcherHandle { _inner: watcher })
}

/// Content edits don't change the registry; only entries appearing,
/// disappearing or being renamed do.
fn affects_listing(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(notify::event::ModifyKind::Name(_))
    )
}
