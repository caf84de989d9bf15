#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub use scriptd_test_utils::{eventually, init_tracing, with_timeout};

/// Write an executable script into `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Write a config file into `dir` and return its path.
pub fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("scriptd.toml");
    fs::write(&path, body).unwrap();
    path
}
