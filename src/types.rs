// src/types.rs

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Script identifier, derived from the script's file name.
pub type ScriptId = String;

/// Trigger identifier, unique within the trigger store.
pub type TriggerId = String;

/// What to do with schedule fires that fell due while the daemon was down.
///
/// - `Skip`: forget them; recurrence resumes from "now".
/// - `FireOnce`: if a stored next-fire time has already passed, fire the
///   trigger once on the first tick, then resume from "now". There is never
///   more than one catch-up fire, however long the daemon was unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedFirePolicy {
    Skip,
    FireOnce,
}

impl Default for MissedFirePolicy {
    fn default() -> Self {
        MissedFirePolicy::Skip
    }
}

impl FromStr for MissedFirePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(MissedFirePolicy::Skip),
            "fire_once" | "fire-once" => Ok(MissedFirePolicy::FireOnce),
            other => Err(format!(
                "invalid missed_fires: {other} (expected \"skip\" or \"fire_once\")"
            )),
        }
    }
}
