// src/config/mod.rs

//! Daemon configuration.
//!
//! - [`model`] defines the TOML-backed raw model and the validated model.
//! - [`loader`] reads a config file from disk.
//! - [`validate`] turns the raw model into a [`ConfigFile`].
//! - [`duration`] parses `"500ms"` / `"3s"` / `"5m"` / `"1h"` strings.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, ControllerConfig, ControllerSection, DaemonConfig, DaemonSection, ExecConfig,
    ExecSection, RawConfigFile,
};
