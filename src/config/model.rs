// src/config/model.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::types::MissedFirePolicy;

/// Daemon configuration as read from a TOML file.
///
/// ```toml
/// [daemon]
/// scripts_dir = "scripts"
/// triggers_file = "triggers.toml"
/// tick_interval = "1s"
/// missed_fires = "skip"
/// utc_offset = "+01:00"
///
/// [exec]
/// max_concurrent = 4
/// timeout = "5m"
/// output_limit = 65536
/// interpreter = "sh"
///
/// [controller]
/// address = "127.0.0.1:9292"
/// ```
///
/// All sections are optional and have reasonable defaults. Durations and the
/// UTC offset stay strings here; [`ConfigFile`] holds the parsed values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub daemon: DaemonSection,

    #[serde(default)]
    pub exec: ExecSection,

    #[serde(default)]
    pub controller: ControllerSection,
}

/// `[daemon]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonSection {
    /// Directory holding the automation scripts.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// File the trigger set is persisted to.
    #[serde(default = "default_triggers_file")]
    pub triggers_file: PathBuf,

    /// How often the clock scheduler wakes up.
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,

    /// `"skip"` (default) or `"fire_once"`.
    #[serde(default)]
    pub missed_fires: MissedFirePolicy,

    /// Offset calendar rules are evaluated in, e.g. `"+02:00"`.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,

    /// Re-scan the scripts directory automatically when it changes.
    #[serde(default = "default_true")]
    pub watch_scripts_dir: bool,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            triggers_file: default_triggers_file(),
            tick_interval: default_tick_interval(),
            missed_fires: MissedFirePolicy::default(),
            utc_offset: default_utc_offset(),
            watch_scripts_dir: true,
        }
    }
}

/// `[exec]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecSection {
    /// Global cap on simultaneously running scripts.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Wall-clock limit per execution.
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Maximum captured output per execution, in bytes.
    #[serde(default = "default_output_limit")]
    pub output_limit: usize,

    /// Optional interpreter; the script path is passed as its last argument.
    #[serde(default)]
    pub interpreter: Option<String>,

    #[serde(default)]
    pub interpreter_args: Vec<String>,

    /// How long shutdown waits for in-flight executions before killing them.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: String,
}

impl Default for ExecSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout: default_timeout(),
            output_limit: default_output_limit(),
            interpreter: None,
            interpreter_args: Vec::new(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// `[controller]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerSection {
    /// `host:port` of the controller event bridge; no event source when absent.
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial: String,

    #[serde(default = "default_reconnect_max")]
    pub reconnect_max: String,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            address: None,
            reconnect_initial: default_reconnect_initial(),
            reconnect_max: default_reconnect_max(),
        }
    }
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_triggers_file() -> PathBuf {
    PathBuf::from("triggers.toml")
}

fn default_tick_interval() -> String {
    "1s".to_string()
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    4
}

fn default_timeout() -> String {
    "5m".to_string()
}

fn default_output_limit() -> usize {
    64 * 1024
}

fn default_shutdown_grace() -> String {
    "10s".to_string()
}

fn default_reconnect_initial() -> String {
    "500ms".to_string()
}

fn default_reconnect_max() -> String {
    "30s".to_string()
}

/// Validated configuration.
///
/// Only constructible through `TryFrom<RawConfigFile>` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub daemon: DaemonConfig,
    pub exec: ExecConfig,
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub scripts_dir: PathBuf,
    pub triggers_file: PathBuf,
    pub tick_interval: Duration,
    pub missed_fires: MissedFirePolicy,
    pub utc_offset: FixedOffset,
    pub watch_scripts_dir: bool,
}

#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub output_limit: usize,
    pub interpreter: Option<String>,
    pub interpreter_args: Vec<String>,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub address: Option<String>,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        daemon: DaemonConfig,
        exec: ExecConfig,
        controller: ControllerConfig,
    ) -> Self {
        Self {
            daemon,
            exec,
            controller,
        }
    }

    /// Resolve relative `scripts_dir` / `triggers_file` against `base`
    /// (normally the directory holding the config file).
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        if self.daemon.scripts_dir.is_relative() {
            self.daemon.scripts_dir = base.join(&self.daemon.scripts_dir);
        }
        if self.daemon.triggers_file.is_relative() {
            self.daemon.triggers_file = base.join(&self.daemon.triggers_file);
        }
        self
    }
}
