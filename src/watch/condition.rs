// src/watch/condition.rs

use crate::triggers::{CrossDirection, EdgeCondition, Trigger, TriggerKind};

use super::controller::Notification;

/// Compare two device values: numerically when both parse as numbers,
/// otherwise as exact strings.
pub fn values_equal(a: &str, b: &str) -> bool {
    match (parse_number(a), parse_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

impl EdgeCondition {
    /// Evaluate the condition for a value change from `old` to `new`.
    ///
    /// An unknown `old` never satisfies a threshold crossing, and counts as
    /// "not the target" for `ValueEquals`.
    pub fn matches(&self, old: Option<&str>, new: &str) -> bool {
        match self {
            EdgeCondition::AnyChange => true,
            EdgeCondition::ValueEquals { value } => {
                values_equal(new, value) && !old.is_some_and(|old| values_equal(old, value))
            }
            EdgeCondition::ThresholdCrossed {
                threshold,
                direction,
            } => {
                let (Some(old), Some(new)) = (old.and_then(parse_number), parse_number(new))
                else {
                    return false;
                };
                let t = *threshold;
                let rising = old < t && t <= new;
                let falling = old >= t && t > new;
                match direction {
                    CrossDirection::Rising => rising,
                    CrossDirection::Falling => falling,
                    CrossDirection::Either => rising || falling,
                }
            }
        }
    }
}

/// Whether an event trigger listens to the notification's device and key.
pub fn listens_to(trigger: &Trigger, notification: &Notification) -> bool {
    if !trigger.enabled {
        return false;
    }
    match &trigger.kind {
        TriggerKind::Event { device, key, .. } => {
            *device == notification.device
                && key.as_ref().is_none_or(|k| *k == notification.key)
        }
        TriggerKind::Schedule { .. } => false,
    }
}

/// Enabled event triggers whose device, key and edge condition all match
/// the notification, in snapshot order.
///
/// `old` is the resolved previous value, which may differ from
/// `notification.old` when the latter was missing.
pub fn match_notification<'a>(
    triggers: &'a [Trigger],
    notification: &Notification,
    old: Option<&str>,
) -> Vec<&'a Trigger> {
    triggers
        .iter()
        .filter(|t| listens_to(t, notification))
        .filter(|t| match &t.kind {
            TriggerKind::Event { condition, .. } => condition.matches(old, &notification.new),
            TriggerKind::Schedule { .. } => false,
        })
        .collect()
}
