// src/triggers/store.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{Result, ScriptdError};
use crate::fs::FileSystem;
use crate::triggers::model::{NewTrigger, Trigger, TriggerKind, TriggerPatch};
use crate::triggers::recurrence::{next_fire, Recurrence};
use crate::types::{MissedFirePolicy, TriggerId};

/// On-disk shape of the persisted trigger set (`[[trigger]]` tables).
#[derive(Debug, Default, Serialize, Deserialize)]
struct TriggerFile {
    #[serde(default)]
    trigger: Vec<Trigger>,
}

/// Holds every configured trigger and persists the full set on each
/// mutation, so a restart reconstructs state without replaying events.
///
/// Triggers are kept ordered by identifier; listing order and the tie order
/// of simultaneous fires both follow it.
#[derive(Debug)]
pub struct TriggerStore {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    offset: FixedOffset,
    triggers: BTreeMap<TriggerId, Trigger>,
}

impl TriggerStore {
    /// Empty store persisting to `path`. Nothing is written until the first
    /// mutation.
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>, offset: FixedOffset) -> Self {
        Self {
            path: path.into(),
            fs,
            offset,
            triggers: BTreeMap::new(),
        }
    }

    /// Load the persisted set from `path` (a missing file is an empty set).
    ///
    /// Invalid or duplicate entries are logged and skipped rather than
    /// failing the daemon. Schedule triggers get their next-fire time
    /// re-derived according to `policy`:
    /// - a future stored time is kept;
    /// - a past stored time is kept under `FireOnce` (one catch-up fire on
    ///   the first tick) and recomputed from `now` under `Skip`;
    /// - a missing one is computed from `now`.
    pub fn load(
        path: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        offset: FixedOffset,
        policy: MissedFirePolicy,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut store = Self::new(path, fs, offset);

        if !store.fs.exists(&store.path) {
            info!(file = ?store.path, "no persisted triggers; starting empty");
            return Ok(store);
        }

        let contents = store.fs.read_to_string(&store.path)?;
        let file: TriggerFile = toml::from_str(&contents)?;

        for mut trigger in file.trigger {
            if let Err(reason) = trigger.validate() {
                warn!(trigger = %trigger.id, %reason, "skipping invalid persisted trigger");
                continue;
            }
            if store.triggers.contains_key(&trigger.id) {
                warn!(trigger = %trigger.id, "skipping duplicate persisted trigger");
                continue;
            }

            if let TriggerKind::Schedule { rule, next_fire: stored } = &mut trigger.kind {
                *stored = match (*stored, policy) {
                    (Some(at), _) if at > now => Some(at),
                    (Some(at), MissedFirePolicy::FireOnce) => {
                        info!(trigger = %trigger.id, missed = %at, "schedule fire missed while down; firing once");
                        Some(at)
                    }
                    (Some(at), MissedFirePolicy::Skip) => {
                        debug!(trigger = %trigger.id, missed = %at, "schedule fire missed while down; skipping");
                        next_fire(rule, now, offset)
                    }
                    (None, _) => next_fire(rule, now, offset),
                };
            }

            store.triggers.insert(trigger.id.clone(), trigger);
        }

        info!(count = store.triggers.len(), file = ?store.path, "triggers loaded");
        Ok(store)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn get(&self, id: &str) -> Option<&Trigger> {
        self.triggers.get(id)
    }

    /// All triggers, ordered by identifier.
    pub fn list(&self) -> Vec<Trigger> {
        self.triggers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Validate and insert a new trigger, computing the next fire time of
    /// schedule triggers from `now`.
    pub fn add(&mut self, new: NewTrigger, now: DateTime<Utc>) -> Result<Trigger> {
        let id = new.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut trigger = Trigger {
            id,
            script: new.script,
            enabled: new.enabled,
            kind: new.kind,
        };
        trigger.validate().map_err(ScriptdError::InvalidTrigger)?;
        if self.triggers.contains_key(&trigger.id) {
            return Err(ScriptdError::InvalidTrigger(format!(
                "trigger '{}' already exists",
                trigger.id
            )));
        }
        self.schedule_from(&mut trigger, now);

        self.triggers.insert(trigger.id.clone(), trigger.clone());
        if let Err(e) = self.persist() {
            self.triggers.remove(&trigger.id);
            return Err(e);
        }

        info!(trigger = %trigger.id, script = %trigger.script, kind = %trigger.kind, "trigger added");
        Ok(trigger)
    }

    pub fn remove(&mut self, id: &str) -> Result<Trigger> {
        let removed = self
            .triggers
            .remove(id)
            .ok_or_else(|| ScriptdError::trigger_not_found(id))?;
        if let Err(e) = self.persist() {
            self.triggers.insert(removed.id.clone(), removed);
            return Err(e);
        }
        info!(trigger = %id, "trigger removed");
        Ok(removed)
    }

    /// Apply a patch. The trigger is left unchanged if the patched result is
    /// invalid or cannot be persisted.
    ///
    /// The next fire time is recomputed from `now` when the schedule rule
    /// changes or a schedule trigger is re-enabled, so a stale time never
    /// causes an immediate fire.
    pub fn update(&mut self, id: &str, patch: TriggerPatch, now: DateTime<Utc>) -> Result<Trigger> {
        let current = self
            .triggers
            .get(id)
            .ok_or_else(|| ScriptdError::trigger_not_found(id))?
            .clone();

        let mut updated = current.clone();
        if let Some(script) = patch.script {
            updated.script = script;
        }
        if let Some(enabled) = patch.enabled {
            updated.enabled = enabled;
        }
        if let Some(kind) = patch.kind {
            updated.kind = kind;
        }
        updated.validate().map_err(ScriptdError::InvalidTrigger)?;

        let rule_changed = schedule_rule(&current) != schedule_rule(&updated);
        let re_enabled = updated.enabled && !current.enabled;
        if rule_changed || re_enabled {
            self.schedule_from(&mut updated, now);
        } else if let (
            TriggerKind::Schedule { next_fire: keep, .. },
            TriggerKind::Schedule { next_fire: slot, .. },
        ) = (&current.kind, &mut updated.kind)
        {
            *slot = *keep;
        }

        self.triggers.insert(id.to_string(), updated.clone());
        if let Err(e) = self.persist() {
            self.triggers.insert(id.to_string(), current);
            return Err(e);
        }

        info!(trigger = %id, kind = %updated.kind, enabled = updated.enabled, "trigger updated");
        Ok(updated)
    }

    /// Store the next fire time computed by the clock after a schedule fire.
    ///
    /// Unknown or non-schedule ids are ignored: the trigger may have been
    /// removed or changed while the fire intent was in flight.
    pub fn record_fire(&mut self, id: &str, next: Option<DateTime<Utc>>) -> Result<()> {
        let Some(trigger) = self.triggers.get_mut(id) else {
            return Ok(());
        };
        let TriggerKind::Schedule { next_fire: slot, .. } = &mut trigger.kind else {
            return Ok(());
        };
        if *slot == next {
            return Ok(());
        }
        *slot = next;
        self.persist()
    }

    fn schedule_from(&self, trigger: &mut Trigger, now: DateTime<Utc>) {
        if let TriggerKind::Schedule { rule, next_fire: slot } = &mut trigger.kind {
            *slot = next_fire(rule, now, self.offset);
        }
    }

    fn persist(&self) -> Result<()> {
        let file = TriggerFile {
            trigger: self.triggers.values().cloned().collect(),
        };
        let contents = toml::to_string_pretty(&file)?;
        self.fs.write(&self.path, contents.as_bytes())?;
        debug!(count = file.trigger.len(), file = ?self.path, "triggers persisted");
        Ok(())
    }
}

fn schedule_rule(trigger: &Trigger) -> Option<&Recurrence> {
    match &trigger.kind {
        TriggerKind::Schedule { rule, .. } => Some(rule),
        TriggerKind::Event { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::triggers::model::EdgeCondition;

    const FILE: &str = "/state/triggers.toml";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn store(fs: &MockFileSystem) -> TriggerStore {
        TriggerStore::new(FILE, Arc::new(fs.clone()), utc())
    }

    #[test]
    fn add_computes_next_fire_and_persists() {
        let fs = MockFileSystem::new();
        let mut store = store(&fs);

        let t = store
            .add(NewTrigger::schedule("lights", Recurrence::every(60)).with_id("t1"), t0())
            .unwrap();

        assert_eq!(t.next_fire(), Some(t0() + TimeDelta::seconds(60)));
        let on_disk = fs.read_to_string(Path::new(FILE)).unwrap();
        assert!(on_disk.contains("t1"));
    }

    #[test]
    fn invalid_trigger_leaves_store_unchanged() {
        let fs = MockFileSystem::new();
        let mut store = store(&fs);

        let err = store
            .add(NewTrigger::event("lights", "", None, EdgeCondition::AnyChange), t0())
            .unwrap_err();
        assert!(matches!(err, ScriptdError::InvalidTrigger(_)));
        assert!(store.is_empty());
        assert!(!fs.exists(Path::new(FILE)));
    }

    #[test]
    fn failed_persist_rolls_back() {
        let fs = MockFileSystem::new();
        let mut store = store(&fs);
        store
            .add(NewTrigger::schedule("lights", Recurrence::every(60)).with_id("t1"), t0())
            .unwrap();

        fs.set_fail_writes(true);
        assert!(store.remove("t1").is_err());
        assert!(store.get("t1").is_some());
        assert!(store
            .add(NewTrigger::schedule("x", Recurrence::every(5)).with_id("t2"), t0())
            .is_err());
        assert!(store.get("t2").is_none());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let fs = MockFileSystem::new();
        let mut store = store(&fs);
        let new = NewTrigger::schedule("lights", Recurrence::every(60)).with_id("t1");
        store.add(new.clone(), t0()).unwrap();
        assert!(matches!(
            store.add(new, t0()),
            Err(ScriptdError::InvalidTrigger(_))
        ));
    }

    #[test]
    fn generated_ids_are_unique() {
        let fs = MockFileSystem::new();
        let mut store = store(&fs);
        let a = store.add(NewTrigger::schedule("a", Recurrence::every(1)), t0()).unwrap();
        let b = store.add(NewTrigger::schedule("a", Recurrence::every(1)), t0()).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn re_enabling_recomputes_next_fire_from_now() {
        let fs = MockFileSystem::new();
        let mut store = store(&fs);
        store
            .add(NewTrigger::schedule("lights", Recurrence::every(60)).with_id("t1"), t0())
            .unwrap();

        let patch = TriggerPatch {
            enabled: Some(false),
            ..Default::default()
        };
        store.update("t1", patch, t0()).unwrap();

        let later = t0() + TimeDelta::hours(3);
        let patch = TriggerPatch {
            enabled: Some(true),
            ..Default::default()
        };
        let t = store.update("t1", patch, later).unwrap();
        assert_eq!(t.next_fire(), Some(later + TimeDelta::seconds(60)));
    }

    #[test]
    fn script_only_patch_keeps_next_fire() {
        let fs = MockFileSystem::new();
        let mut store = store(&fs);
        let added = store
            .add(NewTrigger::schedule("lights", Recurrence::every(60)).with_id("t1"), t0())
            .unwrap();

        let patch = TriggerPatch {
            script: Some("heating".into()),
            ..Default::default()
        };
        let t = store.update("t1", patch, t0() + TimeDelta::seconds(30)).unwrap();
        assert_eq!(t.script, "heating");
        assert_eq!(t.next_fire(), added.next_fire());
    }

    #[test]
    fn update_unknown_is_not_found() {
        let fs = MockFileSystem::new();
        let mut store = store(&fs);
        assert!(matches!(
            store.update("nope", TriggerPatch::default(), t0()),
            Err(ScriptdError::NotFound { kind: "Trigger", .. })
        ));
    }
}
