// src/logging.rs

//! Daemon log output through `tracing` + `tracing-subscriber`.
//!
//! The filter comes from, in order:
//! 1. `--log-level` on the command line
//! 2. `SCRIPTD_LOG`, either a bare level ("debug") or full `EnvFilter`
//!    directives ("scriptd::watch=trace,notify=debug")
//! 3. `info` for scriptd itself
//!
//! A bare level only applies to scriptd's own targets. Dependencies such as
//! `notify` stay at `warn` unless named explicitly.
//!
//! Logs go to STDERR; script output is captured into execution records and
//! never interleaved with daemon logs.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "SCRIPTD_LOG";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let filter = EnvFilter::try_new(filter_directives(cli_level, env.as_deref()))
        .or_else(|_| EnvFilter::try_new(scoped_directives(Level::INFO)))
        .map_err(|e| anyhow::anyhow!("building log filter: {e}"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))?;

    Ok(())
}

fn filter_directives(cli_level: Option<LogLevel>, env: Option<&str>) -> String {
    if let Some(lvl) = cli_level {
        return scoped_directives(level_from_log_level(lvl));
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => match parse_level_str(raw) {
            Some(level) => scoped_directives(level),
            None => raw.to_string(),
        },
        None => scoped_directives(Level::INFO),
    }
}

/// `level` for scriptd, at most `warn` for everything else.
fn scoped_directives(level: Level) -> String {
    let others = level.min(Level::WARN);
    format!(
        "{},scriptd={}",
        others.as_str().to_ascii_lowercase(),
        level.as_str().to_ascii_lowercase()
    )
}

fn level_from_log_level(lvl: LogLevel) -> Level {
    match lvl {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_env_level_strings() {
        assert_eq!(parse_level_str(" Debug "), Some(Level::DEBUG));
        assert_eq!(parse_level_str("warning"), Some(Level::WARN));
        assert_eq!(parse_level_str("loud"), None);
    }

    #[test]
    fn bare_levels_are_scoped_to_scriptd() {
        assert_eq!(filter_directives(None, None), "warn,scriptd=info");
        assert_eq!(filter_directives(None, Some("debug")), "warn,scriptd=debug");
        assert_eq!(filter_directives(Some(LogLevel::Error), Some("trace")), "error,scriptd=error");
    }

    #[test]
    fn env_directives_pass_through() {
        let raw = "scriptd::watch=trace,notify=debug";
        assert_eq!(filter_directives(None, Some(raw)), raw);
        assert!(EnvFilter::try_new(filter_directives(None, Some(raw))).is_ok());
        assert_eq!(filter_directives(None, Some("  ")), "warn,scriptd=info");
    }
}
