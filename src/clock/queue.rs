// src/clock/queue.rs

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, warn};

use crate::triggers::{next_fire, Recurrence, Trigger, TriggerKind};
use crate::types::{ScriptId, TriggerId};

/// A schedule trigger that fell due on a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockFire {
    pub trigger: TriggerId,
    pub script: ScriptId,
    /// The instant the trigger was due.
    pub due: DateTime<Utc>,
    /// Next fire time, computed from the tick's wall-clock time.
    pub next_fire: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct Slot {
    script: ScriptId,
    rule: Recurrence,
    at: DateTime<Utc>,
}

/// Enabled schedule triggers ordered by next-fire time.
///
/// `slots` is authoritative; heap entries whose time no longer matches their
/// slot are stale and skipped when popped.
#[derive(Debug)]
pub struct ClockQueue {
    offset: FixedOffset,
    heap: BinaryHeap<Reverse<(DateTime<Utc>, TriggerId)>>,
    slots: HashMap<TriggerId, Slot>,
}

impl ClockQueue {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            offset,
            heap: BinaryHeap::new(),
            slots: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Earliest pending fire time.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.slots.values().map(|s| s.at).min()
    }

    /// Reconcile with a snapshot of the trigger set.
    ///
    /// Disabled, removed and non-schedule triggers drop out. A trigger already
    /// queued with an unchanged rule keeps the queue's own next-fire time,
    /// which is never older than the snapshot's; otherwise the snapshot's
    /// next-fire is used, or one is computed from `now`.
    pub fn sync(&mut self, triggers: &[Trigger], now: DateTime<Utc>) {
        let mut next_slots: HashMap<TriggerId, Slot> = HashMap::new();

        for trigger in triggers.iter().filter(|t| t.enabled) {
            let TriggerKind::Schedule { rule, next_fire: stored } = &trigger.kind else {
                continue;
            };

            let at = match self.slots.get(&trigger.id) {
                Some(slot) if slot.rule == *rule => Some(slot.at),
                _ => stored.or_else(|| next_fire(rule, now, self.offset)),
            };
            let Some(at) = at else {
                warn!(trigger = %trigger.id, rule = %rule, "schedule has no future fire time; not queued");
                continue;
            };

            next_slots.insert(
                trigger.id.clone(),
                Slot {
                    script: trigger.script.clone(),
                    rule: rule.clone(),
                    at,
                },
            );
        }

        self.slots = next_slots;
        self.heap = self
            .slots
            .iter()
            .map(|(id, slot)| Reverse((slot.at, id.clone())))
            .collect();
        debug!(queued = self.slots.len(), "clock queue synced");
    }

    /// Pop every trigger due at `now` and reschedule it from `now`.
    ///
    /// Missed fires are not backfilled: however far `now` is past a
    /// trigger's due time, it fires once. Fires are returned in trigger
    /// identifier order.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<ClockFire> {
        let mut due = Vec::new();

        while let Some(Reverse((at, _))) = self.heap.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((at, id))) = self.heap.pop() else {
                break;
            };
            match self.slots.get(&id) {
                Some(slot) if slot.at == at => due.push(id),
                _ => continue,
            }
        }

        due.sort();
        due.dedup();

        let mut fires = Vec::with_capacity(due.len());
        for id in due {
            let Some(slot) = self.slots.get_mut(&id) else {
                continue;
            };
            let due_at = slot.at;
            let next = next_fire(&slot.rule, now, self.offset);
            fires.push(ClockFire {
                trigger: id.clone(),
                script: slot.script.clone(),
                due: due_at,
                next_fire: next,
            });

            match next {
                Some(next) => {
                    slot.at = next;
                    self.heap.push(Reverse((next, id)));
                }
                None => {
                    warn!(trigger = %id, "schedule exhausted; removing from clock");
                    self.slots.remove(&id);
                }
            }
        }
        fires
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> TimeDelta {
        TimeDelta::seconds(n)
    }

    fn schedule(id: &str, every: u64, next: Option<DateTime<Utc>>) -> Trigger {
        Trigger {
            id: id.into(),
            script: format!("script-{id}"),
            enabled: true,
            kind: TriggerKind::Schedule {
                rule: Recurrence::every(every),
                next_fire: next,
            },
        }
    }

    fn queue() -> ClockQueue {
        ClockQueue::new(FixedOffset::east_opt(0).unwrap())
    }

    #[test]
    fn every_sixty_seconds_fires_at_60_and_120() {
        let mut q = queue();
        q.sync(&[schedule("t1", 60, None)], t0());

        assert!(q.pop_due(t0() + secs(59)).is_empty());

        let fires = q.pop_due(t0() + secs(60));
        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].due, t0() + secs(60));
        assert_eq!(fires[0].next_fire, Some(t0() + secs(120)));

        assert!(q.pop_due(t0() + secs(119)).is_empty());
        let fires = q.pop_due(t0() + secs(120));
        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].due, t0() + secs(120));
    }

    #[test]
    fn long_gap_fires_once_and_resumes_from_now() {
        let mut q = queue();
        q.sync(&[schedule("t1", 60, None)], t0());

        let later = t0() + secs(3600);
        let fires = q.pop_due(later);
        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].next_fire, Some(later + secs(60)));
        assert!(q.pop_due(later).is_empty());
    }

    #[test]
    fn simultaneous_fires_come_out_in_id_order() {
        let mut q = queue();
        let at = t0() + secs(10);
        q.sync(
            &[
                schedule("c", 60, Some(at)),
                schedule("a", 60, Some(at + secs(1))),
                schedule("b", 60, Some(at)),
            ],
            t0(),
        );

        let ids: Vec<_> = q
            .pop_due(at + secs(5))
            .into_iter()
            .map(|f| f.trigger)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn disabled_and_removed_triggers_are_not_queued() {
        let mut q = queue();
        let mut off = schedule("off", 1, None);
        off.enabled = false;
        q.sync(&[schedule("on", 1, None), off], t0());
        assert_eq!(q.len(), 1);

        q.sync(&[], t0());
        assert!(q.pop_due(t0() + secs(10)).is_empty());
    }

    #[test]
    fn resync_with_same_rule_keeps_local_next_fire() {
        let mut q = queue();
        let snapshot = vec![schedule("t1", 60, Some(t0() + secs(60)))];
        q.sync(&snapshot, t0());
        q.pop_due(t0() + secs(60));

        // A stale snapshot (still carrying the old next-fire) must not
        // cause a second fire for the same slot.
        q.sync(&snapshot, t0() + secs(61));
        assert!(q.pop_due(t0() + secs(61)).is_empty());
        assert_eq!(q.next_deadline(), Some(t0() + secs(120)));
    }

    #[test]
    fn changed_rule_takes_snapshot_time() {
        let mut q = queue();
        q.sync(&[schedule("t1", 60, Some(t0() + secs(60)))], t0());
        q.sync(&[schedule("t1", 5, Some(t0() + secs(5)))], t0());
        assert_eq!(q.next_deadline(), Some(t0() + secs(5)));
    }
}
