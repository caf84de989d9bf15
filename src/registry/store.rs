// src/registry/store.rs

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::errors::{Result, ScriptdError};
use crate::fs::FileSystem;
use crate::types::ScriptId;

/// One script as reported by the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    pub id: ScriptId,
    pub path: PathBuf,
}

/// Backing store of script files.
pub trait ScriptStore: Send + Sync + Debug {
    /// All scripts currently present, ordered by identifier.
    fn list_scripts(&self) -> Result<Vec<ScriptEntry>>;

    /// Executable path for a script; `NotFound` if it no longer exists.
    fn read(&self, id: &str) -> Result<PathBuf>;
}

/// Scripts are the regular files directly inside one directory; the
/// identifier is the file stem (`lights.sh` -> `lights`).
#[derive(Debug, Clone)]
pub struct DirScriptStore {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl DirScriptStore {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan(&self) -> Result<BTreeMap<ScriptId, PathBuf>> {
        let mut paths = if self.fs.exists(&self.root) {
            self.fs.read_dir(&self.root)?
        } else {
            warn!(dir = ?self.root, "scripts directory does not exist; registry is empty");
            Vec::new()
        };
        // Sorted so duplicate stems resolve the same way every time.
        paths.sort();

        let mut scripts = BTreeMap::new();
        for path in paths {
            if !self.fs.is_file(&path) {
                continue;
            }
            let Some(id) = script_id_for(&path) else {
                continue;
            };
            if let Some(existing) = scripts.get(&id) {
                warn!(
                    script = %id,
                    kept = ?existing,
                    ignored = ?path,
                    "duplicate script identifier; ignoring later file"
                );
                continue;
            }
            scripts.insert(id, path);
        }
        Ok(scripts)
    }
}

impl ScriptStore for DirScriptStore {
    fn list_scripts(&self) -> Result<Vec<ScriptEntry>> {
        Ok(self
            .scan()?
            .into_iter()
            .map(|(id, path)| ScriptEntry { id, path })
            .collect())
    }

    fn read(&self, id: &str) -> Result<PathBuf> {
        self.scan()?
            .remove(id)
            .ok_or_else(|| ScriptdError::script_not_found(id))
    }
}

/// Identifier for a file in the scripts directory, or `None` for files that
/// are not scripts (hidden files, editor backups, temp files).
pub fn script_id_for(path: &Path) -> Option<ScriptId> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') || name.ends_with('~') || name.ends_with(".tmp") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn ids_come_from_file_stems() {
        assert_eq!(script_id_for(Path::new("/s/lights.sh")), Some("lights".into()));
        assert_eq!(script_id_for(Path::new("/s/run")), Some("run".into()));
        assert_eq!(script_id_for(Path::new("/s/.hidden.sh")), None);
        assert_eq!(script_id_for(Path::new("/s/lights.sh~")), None);
    }

    #[test]
    fn duplicate_stems_keep_first_sorted_path() {
        let fs = MockFileSystem::new();
        fs.add_file("/s/lights.tcl", "puts on");
        fs.add_file("/s/lights.sh", "echo on");
        let store = DirScriptStore::new("/s", Arc::new(fs));

        let scripts = store.list_scripts().unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].path, PathBuf::from("/s/lights.sh"));
    }

    #[test]
    fn missing_directory_is_empty() {
        let store = DirScriptStore::new("/nope", Arc::new(MockFileSystem::new()));
        assert!(store.list_scripts().unwrap().is_empty());
        assert!(matches!(store.read("x"), Err(ScriptdError::NotFound { .. })));
    }
}
