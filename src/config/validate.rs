// src/config/validate.rs

use std::time::Duration;

use chrono::FixedOffset;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, ControllerConfig, ControllerSection, DaemonConfig, DaemonSection, ExecConfig,
    ExecSection, RawConfigFile,
};
use crate::errors::{Result, ScriptdError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ScriptdError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let daemon = validate_daemon(&raw.daemon)?;
        let exec = validate_exec(&raw.exec)?;
        let controller = validate_controller(&raw.controller)?;
        Ok(ConfigFile::new_unchecked(daemon, exec, controller))
    }
}

fn validate_daemon(section: &DaemonSection) -> Result<DaemonConfig> {
    let tick_interval = duration_field("daemon.tick_interval", &section.tick_interval)?;
    if tick_interval.is_zero() {
        return Err(config_error("[daemon].tick_interval must be > 0"));
    }

    let utc_offset = parse_utc_offset(&section.utc_offset)?;

    if section.scripts_dir.as_os_str().is_empty() {
        return Err(config_error("[daemon].scripts_dir must not be empty"));
    }
    if section.triggers_file.as_os_str().is_empty() {
        return Err(config_error("[daemon].triggers_file must not be empty"));
    }

    Ok(DaemonConfig {
        scripts_dir: section.scripts_dir.clone(),
        triggers_file: section.triggers_file.clone(),
        tick_interval,
        missed_fires: section.missed_fires,
        utc_offset,
        watch_scripts_dir: section.watch_scripts_dir,
    })
}

fn validate_exec(section: &ExecSection) -> Result<ExecConfig> {
    if section.max_concurrent == 0 {
        return Err(config_error("[exec].max_concurrent must be >= 1 (got 0)"));
    }
    if section.output_limit == 0 {
        return Err(config_error("[exec].output_limit must be >= 1 (got 0)"));
    }

    let timeout = duration_field("exec.timeout", &section.timeout)?;
    if timeout.is_zero() {
        return Err(config_error("[exec].timeout must be > 0"));
    }
    let shutdown_grace = duration_field("exec.shutdown_grace", &section.shutdown_grace)?;

    if let Some(interpreter) = &section.interpreter {
        if interpreter.trim().is_empty() {
            return Err(config_error("[exec].interpreter must not be empty when set"));
        }
    }

    Ok(ExecConfig {
        max_concurrent: section.max_concurrent,
        timeout,
        output_limit: section.output_limit,
        interpreter: section.interpreter.clone(),
        interpreter_args: section.interpreter_args.clone(),
        shutdown_grace,
    })
}

fn validate_controller(section: &ControllerSection) -> Result<ControllerConfig> {
    let reconnect_initial =
        duration_field("controller.reconnect_initial", &section.reconnect_initial)?;
    let reconnect_max = duration_field("controller.reconnect_max", &section.reconnect_max)?;

    if reconnect_initial.is_zero() {
        return Err(config_error("[controller].reconnect_initial must be > 0"));
    }
    if reconnect_initial > reconnect_max {
        return Err(config_error(
            "[controller].reconnect_initial must not exceed reconnect_max",
        ));
    }

    let address = match &section.address {
        Some(addr) if addr.trim().is_empty() => {
            return Err(config_error("[controller].address must not be empty when set"));
        }
        other => other.clone(),
    };

    Ok(ControllerConfig {
        address,
        reconnect_initial,
        reconnect_max,
    })
}

fn duration_field(name: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| config_error(&format!("{name}: {e}")))
}

/// Parse `"+HH:MM"`, `"-HH:MM"` or `"Z"`.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| config_error("invalid utc offset"));
    }

    let invalid = || config_error(&format!("invalid utc_offset '{s}' (expected e.g. \"+02:00\")"));

    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn config_error(msg: &str) -> ScriptdError {
    ScriptdError::ConfigError(msg.to_string())
}
