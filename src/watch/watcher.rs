// src/watch/watcher.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{
    shutdown_requested, Diagnostic, DiagnosticKind, DispatchEvent, FireIntent, FireOrigin,
};
use crate::triggers::{Trigger, TriggerKind};

use super::condition::match_notification;
use super::controller::{Controller, Notification};

/// Exponential reconnect delay: doubles from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following one is doubled.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

enum Stop {
    Shutdown,
    IntakeClosed,
}

/// Spawn the event watcher loop.
///
/// The loop subscribes to `controller`, matches every notification against
/// the latest trigger snapshot and sends one `DispatchEvent::Fire` per
/// matching trigger, in notification order. A failed subscription or an
/// ended stream is reported as a `ConnectionLost` diagnostic and retried
/// after the backoff delay.
pub fn spawn_event_watcher(
    controller: Arc<dyn Controller>,
    intake_tx: mpsc::Sender<DispatchEvent>,
    triggers_rx: watch::Receiver<Arc<Vec<Trigger>>>,
    mut backoff: Backoff,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("event watcher started");
        let mut last_seen: HashMap<(String, String), String> = HashMap::new();

        loop {
            let subscribed = tokio::select! {
                res = controller.subscribe() => res,
                _ = shutdown_requested(&mut shutdown) => break,
            };

            let failure = match subscribed {
                Ok(mut rx) => {
                    backoff.reset();
                    info!("subscribed to controller notifications");
                    let snapshot = triggers_rx.borrow().clone();
                    seed_last_seen(controller.as_ref(), &snapshot, &mut last_seen).await;

                    let stop = loop {
                        let notification = tokio::select! {
                            n = rx.recv() => n,
                            _ = shutdown_requested(&mut shutdown) => break Some(Stop::Shutdown),
                        };
                        let Some(notification) = notification else {
                            break None;
                        };
                        if !handle_notification(
                            &intake_tx,
                            &triggers_rx,
                            &mut last_seen,
                            notification,
                        )
                        .await
                        {
                            break Some(Stop::IntakeClosed);
                        }
                    };

                    match stop {
                        Some(Stop::Shutdown) => break,
                        Some(Stop::IntakeClosed) => {
                            info!("dispatcher intake closed; event watcher stopping");
                            return;
                        }
                        None => "notification stream ended".to_string(),
                    }
                }
                Err(err) => err.to_string(),
            };

            let delay = backoff.next_delay();
            warn!(error = %failure, retry_ms = delay.as_millis() as u64, "controller connection lost");
            let diagnostic = Diagnostic::new(
                DiagnosticKind::ConnectionLost,
                format!("{failure}; retrying in {delay:?}"),
            );
            if intake_tx.send(DispatchEvent::Diagnostic(diagnostic)).await.is_err() {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!("event watcher stopped");
    })
}

/// Prime `last_seen` with the controller's current value of every key an
/// enabled event trigger names. Refreshed on each subscription, since values
/// may have moved while the stream was down.
async fn seed_last_seen(
    controller: &dyn Controller,
    triggers: &[Trigger],
    last_seen: &mut HashMap<(String, String), String>,
) {
    for trigger in triggers.iter().filter(|t| t.enabled) {
        let TriggerKind::Event {
            device,
            key: Some(key),
            ..
        } = &trigger.kind
        else {
            continue;
        };
        match controller.get_value(device, key).await {
            Ok(Some(value)) => {
                last_seen.insert((device.clone(), key.clone()), value);
            }
            Ok(None) => {}
            Err(err) => {
                debug!(error = %err, "could not read current values from controller");
                return;
            }
        }
    }
}

/// Resolve the previous value, match and forward fire intents.
/// Returns `false` once the intake is closed.
///
/// A notification without `old` is compared against the last value seen for
/// that key; with no history the previous value is unknown.
async fn handle_notification(
    intake_tx: &mpsc::Sender<DispatchEvent>,
    triggers_rx: &watch::Receiver<Arc<Vec<Trigger>>>,
    last_seen: &mut HashMap<(String, String), String>,
    notification: Notification,
) -> bool {
    let snapshot = triggers_rx.borrow().clone();
    let cache_key = (notification.device.clone(), notification.key.clone());

    let old = notification
        .old
        .clone()
        .or_else(|| last_seen.get(&cache_key).cloned());
    last_seen.insert(cache_key, notification.new.clone());

    let matched = match_notification(&snapshot, &notification, old.as_deref());
    debug!(
        device = %notification.device,
        key = %notification.key,
        matched = matched.len(),
        "notification received"
    );

    let at = Utc::now();
    for trigger in matched {
        let intent = FireIntent {
            trigger: trigger.id.clone(),
            script: trigger.script.clone(),
            origin: FireOrigin::Event,
            at,
            next_fire: None,
        };
        if intake_tx.send(DispatchEvent::Fire(intent)).await.is_err() {
            return false;
        }
    }
    true
}
