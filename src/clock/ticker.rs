// src/clock/ticker.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::engine::{DispatchEvent, FireIntent, FireOrigin};
use crate::triggers::Trigger;

use super::queue::ClockQueue;

/// Spawn the clock loop.
///
/// The loop wakes every `tick`, pops the schedule triggers that are due and
/// sends one `DispatchEvent::Fire` per trigger on `intake_tx`. Trigger set
/// changes arrive as snapshots on `triggers_rx`. The loop ends when
/// `shutdown` flips to `true`, its sender is dropped, or the intake closes.
pub fn spawn_clock(
    intake_tx: mpsc::Sender<DispatchEvent>,
    mut triggers_rx: watch::Receiver<Arc<Vec<Trigger>>>,
    tick: Duration,
    offset: FixedOffset,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut queue = ClockQueue::new(offset);
        let initial = triggers_rx.borrow_and_update().clone();
        queue.sync(&initial, Utc::now());

        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(tick_ms = tick.as_millis() as u64, queued = queue.len(), "clock started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for fire in queue.pop_due(Utc::now()) {
                        debug!(trigger = %fire.trigger, script = %fire.script, due = %fire.due, "schedule due");
                        let intent = FireIntent {
                            trigger: fire.trigger,
                            script: fire.script,
                            origin: FireOrigin::Schedule,
                            at: fire.due,
                            next_fire: fire.next_fire,
                        };
                        if intake_tx.send(DispatchEvent::Fire(intent)).await.is_err() {
                            info!("dispatcher intake closed; clock stopping");
                            return;
                        }
                    }
                }

                changed = triggers_rx.changed() => {
                    if changed.is_err() {
                        info!("trigger snapshots closed; clock stopping");
                        break;
                    }
                    let snapshot = triggers_rx.borrow_and_update().clone();
                    queue.sync(&snapshot, Utc::now());
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("clock stopped");
    })
}
