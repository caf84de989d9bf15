// src/fs/mock.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::FileSystem;

/// In-memory filesystem holding plain files; directories exist implicitly
/// as the parents of files (plus any created with [`MockFileSystem::add_dir`]).
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<BTreeMap<PathBuf, Vec<u8>>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let mut files = self.files.lock().expect("mock fs lock poisoned");
        files.insert(path.as_ref().to_path_buf(), content.into());
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut dirs = self.dirs.lock().expect("mock fs lock poisoned");
        dirs.push(path.as_ref().to_path_buf());
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) -> bool {
        let mut files = self.files.lock().expect("mock fs lock poisoned");
        files.remove(path.as_ref()).is_some()
    }

    /// Make every subsequent `write` fail (simulates a full disk).
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().expect("mock fs lock poisoned") = fail;
    }

    fn is_dir(&self, path: &Path) -> bool {
        let dirs = self.dirs.lock().expect("mock fs lock poisoned");
        if dirs.iter().any(|d| d == path) {
            return true;
        }
        let files = self.files.lock().expect("mock fs lock poisoned");
        files.keys().any(|f| f.starts_with(path) && f != path)
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let files = self.files.lock().expect("mock fs lock poisoned");
        let bytes = files
            .get(path)
            .ok_or_else(|| anyhow!("file not found: {:?}", path))?;
        String::from_utf8(bytes.clone()).map_err(|e| anyhow!("invalid utf-8 in {:?}: {e}", path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if *self.fail_writes.lock().expect("mock fs lock poisoned") {
            return Err(anyhow!("simulated write failure for {:?}", path));
        }
        self.add_file(path, contents.to_vec());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.is_file(path) || self.is_dir(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        let files = self.files.lock().expect("mock fs lock poisoned");
        files.contains_key(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        if !self.is_dir(path) {
            return Err(anyhow!("not a directory: {:?}", path));
        }
        let files = self.files.lock().expect("mock fs lock poisoned");
        let mut children: Vec<PathBuf> = files
            .keys()
            .filter_map(|f| {
                let rest = f.strip_prefix(path).ok()?;
                let first = rest.components().next()?;
                Some(path.join(first))
            })
            .collect();
        children.dedup();
        Ok(children)
    }
}
