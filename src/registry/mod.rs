// src/registry/mod.rs

//! Script registry.
//!
//! Maps a script identifier to its file location and metadata. The backing
//! store is an external collaborator behind [`ScriptStore`]; the registry only
//! keeps in-memory state and reconciles it on [`ScriptRegistry::refresh`].
//!
//! Triggers reference scripts by identifier and are *not* told when a script
//! disappears; the dispatcher re-resolves the identifier on every fire.

pub mod store;
pub mod watcher;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{Result, ScriptdError};
use crate::types::ScriptId;

pub use store::{DirScriptStore, ScriptEntry, ScriptStore};
pub use watcher::{spawn_scripts_watcher, ScriptsWatcherHandle};

/// A runnable script known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Script {
    pub id: ScriptId,
    pub path: PathBuf,
    /// Disabled scripts are skipped by trigger fires; manual runs still work.
    pub enabled: bool,
}

/// What a [`ScriptRegistry::refresh`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub added: Vec<ScriptId>,
    pub removed: Vec<ScriptId>,
}

impl RefreshSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug)]
pub struct ScriptRegistry {
    store: Arc<dyn ScriptStore>,
    scripts: BTreeMap<ScriptId, Script>,
}

impl ScriptRegistry {
    /// Create an empty registry; call [`refresh`](Self::refresh) to populate it.
    pub fn new(store: Arc<dyn ScriptStore>) -> Self {
        Self {
            store,
            scripts: BTreeMap::new(),
        }
    }

    /// Create a registry and perform the initial scan.
    pub fn load(store: Arc<dyn ScriptStore>) -> Result<Self> {
        let mut registry = Self::new(store);
        let summary = registry.refresh()?;
        info!(scripts = summary.added.len(), "script registry loaded");
        Ok(registry)
    }

    /// All known scripts, ordered by identifier.
    pub fn list(&self) -> Vec<Script> {
        self.scripts.values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Result<&Script> {
        self.scripts
            .get(id)
            .ok_or_else(|| ScriptdError::script_not_found(id))
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Resolve the executable path for a known script through the store,
    /// which fails if the file vanished since the last refresh.
    pub fn resolve_executable(&self, id: &str) -> Result<PathBuf> {
        self.get(id)?;
        self.store.read(id)
    }

    /// Re-scan the backing store and reconcile additions and removals.
    ///
    /// The enabled flag of scripts that survive the refresh is preserved;
    /// new scripts start enabled. Emits no events.
    pub fn refresh(&mut self) -> Result<RefreshSummary> {
        let entries = self.store.list_scripts()?;
        let mut next: BTreeMap<ScriptId, Script> = BTreeMap::new();
        let mut summary = RefreshSummary::default();

        for entry in entries {
            let enabled = match self.scripts.get(&entry.id) {
                Some(existing) => existing.enabled,
                None => {
                    summary.added.push(entry.id.clone());
                    true
                }
            };
            next.insert(
                entry.id.clone(),
                Script {
                    id: entry.id,
                    path: entry.path,
                    enabled,
                },
            );
        }

        summary.removed = self
            .scripts
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();

        self.scripts = next;

        if !summary.is_empty() {
            info!(
                added = ?summary.added,
                removed = ?summary.removed,
                "script registry refreshed"
            );
        } else {
            debug!("script registry refreshed; no changes");
        }
        Ok(summary)
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<Script> {
        let script = self
            .scripts
            .get_mut(id)
            .ok_or_else(|| ScriptdError::script_not_found(id))?;
        script.enabled = enabled;
        info!(script = %id, enabled, "script enabled flag changed");
        Ok(script.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn registry_with(fs: &MockFileSystem) -> ScriptRegistry {
        let store = DirScriptStore::new("/scripts", Arc::new(fs.clone()));
        ScriptRegistry::load(Arc::new(store)).unwrap()
    }

    #[test]
    fn refresh_reconciles_additions_and_removals() {
        let fs = MockFileSystem::new();
        fs.add_file("/scripts/lights.sh", "echo on");
        fs.add_file("/scripts/heating.tcl", "puts hi");
        let mut registry = registry_with(&fs);
        assert_eq!(registry.len(), 2);

        fs.remove_file("/scripts/heating.tcl");
        fs.add_file("/scripts/alarm.sh", "echo alarm");
        let summary = registry.refresh().unwrap();

        assert_eq!(summary.added, vec!["alarm".to_string()]);
        assert_eq!(summary.removed, vec!["heating".to_string()]);
        assert!(matches!(
            registry.get("heating"),
            Err(ScriptdError::NotFound { kind: "Script", .. })
        ));
        assert_eq!(registry.get("alarm").unwrap().path, Path::new("/scripts/alarm.sh"));
    }

    #[test]
    fn enabled_flag_survives_refresh() {
        let fs = MockFileSystem::new();
        fs.add_file("/scripts/lights.sh", "echo on");
        let mut registry = registry_with(&fs);

        registry.set_enabled("lights", false).unwrap();
        registry.refresh().unwrap();
        assert!(!registry.get("lights").unwrap().enabled);
    }

    #[test]
    fn resolve_fails_once_file_is_gone() {
        let fs = MockFileSystem::new();
        fs.add_file("/scripts/lights.sh", "echo on");
        let registry = registry_with(&fs);

        fs.remove_file("/scripts/lights.sh");
        assert!(registry.resolve_executable("lights").is_err());
    }
}
