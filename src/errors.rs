// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptdError {
    /// Unknown script or trigger identifier. Reported to the caller, never fatal.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Malformed trigger payload, rejected at the trigger store boundary.
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Single-flight rule or global concurrency cap saturated.
    #[error("Busy: {0}")]
    Busy(String),

    /// Controller interface unreachable or its stream ended.
    #[error("Controller connection lost: {0}")]
    ConnectionLost(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// The dispatcher loop is gone (daemon shutting down).
    #[error("Dispatcher is not running")]
    DispatcherClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScriptdError {
    pub fn script_not_found(id: impl Into<String>) -> Self {
        ScriptdError::NotFound {
            kind: "Script",
            id: id.into(),
        }
    }

    pub fn trigger_not_found(id: impl Into<String>) -> Self {
        ScriptdError::NotFound {
            kind: "Trigger",
            id: id.into(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ScriptdError>;
