// src/triggers/model.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::triggers::recurrence::Recurrence;
use crate::types::{ScriptId, TriggerId};

/// A rule binding a time-based or event-based condition to a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    /// Target script; resolved against the registry on every fire.
    pub script: ScriptId,
    /// Disabled triggers are retained but never evaluated.
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub kind: TriggerKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    Schedule {
        /// Derived; recomputed after each fire.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_fire: Option<DateTime<Utc>>,
        rule: Recurrence,
    },
    Event {
        device: String,
        /// Only notifications for this value key match; `None` matches any key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        condition: EdgeCondition,
    },
}

/// Predicate applied to an old/new value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    AnyChange,
    /// The value transitioned into `value`.
    ValueEquals { value: String },
    /// Old and new values straddle `threshold`.
    ThresholdCrossed {
        threshold: f64,
        #[serde(default)]
        direction: CrossDirection,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossDirection {
    Rising,
    Falling,
    Either,
}

impl Default for CrossDirection {
    fn default() -> Self {
        CrossDirection::Either
    }
}

fn default_true() -> bool {
    true
}

/// Input to [`TriggerStore::add`](crate::triggers::TriggerStore::add).
///
/// `id` is generated when absent. A `next_fire` given for a schedule trigger
/// is ignored; the store computes it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrigger {
    pub id: Option<TriggerId>,
    pub script: ScriptId,
    pub enabled: bool,
    pub kind: TriggerKind,
}

impl NewTrigger {
    pub fn schedule(script: impl Into<ScriptId>, rule: Recurrence) -> Self {
        Self {
            id: None,
            script: script.into(),
            enabled: true,
            kind: TriggerKind::Schedule {
                rule,
                next_fire: None,
            },
        }
    }

    pub fn event(
        script: impl Into<ScriptId>,
        device: impl Into<String>,
        key: Option<&str>,
        condition: EdgeCondition,
    ) -> Self {
        Self {
            id: None,
            script: script.into(),
            enabled: true,
            kind: TriggerKind::Event {
                device: device.into(),
                key: key.map(str::to_string),
                condition,
            },
        }
    }

    pub fn with_id(mut self, id: impl Into<TriggerId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Partial update for [`TriggerStore::update`](crate::triggers::TriggerStore::update).
/// `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerPatch {
    pub script: Option<ScriptId>,
    pub enabled: Option<bool>,
    pub kind: Option<TriggerKind>,
}

impl Trigger {
    pub fn is_schedule(&self) -> bool {
        matches!(self.kind, TriggerKind::Schedule { .. })
    }

    pub fn is_event(&self) -> bool {
        matches!(self.kind, TriggerKind::Event { .. })
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        match &self.kind {
            TriggerKind::Schedule { next_fire, .. } => *next_fire,
            TriggerKind::Event { .. } => None,
        }
    }

    /// Validate the kind-specific payload.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("trigger id must not be empty".to_string());
        }
        if self.id.chars().any(char::is_whitespace) {
            return Err(format!("trigger id '{}' must not contain whitespace", self.id));
        }
        if self.script.trim().is_empty() {
            return Err("target script must not be empty".to_string());
        }

        match &self.kind {
            TriggerKind::Schedule { rule, .. } => rule.validate(),
            TriggerKind::Event {
                device,
                key,
                condition,
            } => {
                if device.trim().is_empty() {
                    return Err("event trigger device must not be empty".to_string());
                }
                if let Some(key) = key {
                    if key.trim().is_empty() {
                        return Err("event trigger key must not be empty when set".to_string());
                    }
                }
                if let EdgeCondition::ThresholdCrossed { threshold, .. } = condition {
                    if !threshold.is_finite() {
                        return Err("threshold must be a finite number".to_string());
                    }
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Schedule { rule, .. } => write!(f, "schedule({rule})"),
            TriggerKind::Event {
                device,
                key,
                condition,
            } => {
                let key = key.as_deref().unwrap_or("*");
                write!(f, "event({device}/{key}, {condition})")
            }
        }
    }
}

impl std::fmt::Display for EdgeCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeCondition::AnyChange => f.write_str("any-change"),
            EdgeCondition::ValueEquals { value } => write!(f, "value-equals {value}"),
            EdgeCondition::ThresholdCrossed {
                threshold,
                direction,
            } => write!(f, "threshold-crossed {threshold} ({direction:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(device: &str, key: Option<&str>) -> Trigger {
        Trigger {
            id: "t1".into(),
            script: "lights".into(),
            enabled: true,
            kind: TriggerKind::Event {
                device: device.into(),
                key: key.map(str::to_string),
                condition: EdgeCondition::AnyChange,
            },
        }
    }

    #[test]
    fn event_trigger_needs_device() {
        assert!(event("D1", Some("STATE")).validate().is_ok());
        assert!(event("  ", None).validate().is_err());
        assert!(event("D1", Some("")).validate().is_err());
    }

    #[test]
    fn threshold_must_be_finite() {
        let mut t = event("D1", None);
        t.kind = TriggerKind::Event {
            device: "D1".into(),
            key: None,
            condition: EdgeCondition::ThresholdCrossed {
                threshold: f64::NAN,
                direction: CrossDirection::Rising,
            },
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn id_must_be_a_single_token() {
        let mut t = event("D1", None);
        t.id = "two words".into();
        assert!(t.validate().is_err());
    }
}
