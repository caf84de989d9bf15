// src/watch/controller.rs

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::errors::{Result, ScriptdError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Buffer size of a single subscription channel.
pub const SUBSCRIPTION_BUFFER: usize = 64;

/// A device value change reported by the controller.
///
/// `old` may be absent when the controller only delivers partial samples.
/// Values are carried as strings; JSON numbers and booleans are accepted and
/// converted on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub device: String,
    pub key: String,
    #[serde(default, deserialize_with = "optional_value", skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    #[serde(deserialize_with = "value")]
    pub new: String,
}

impl Notification {
    pub fn new(
        device: impl Into<String>,
        key: impl Into<String>,
        old: Option<&str>,
        new: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            key: key.into(),
            old: old.map(str::to_string),
            new: new.into(),
        }
    }
}

fn value<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    optional_value(deserializer)?.ok_or_else(|| de::Error::custom("value must not be null"))
}

fn optional_value<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(de::Error::custom(format!("unsupported value: {other}"))),
    }
}

/// The home-automation controller as seen by the event watcher.
///
/// `subscribe` opens a notification stream; the stream ending (the receiver
/// yielding `None`) means the connection was lost. `get_value` queries the
/// current value of a device key.
pub trait Controller: Send + Sync {
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Notification>>>;

    fn get_value<'a>(
        &'a self,
        device: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>>;
}

#[derive(Debug)]
struct ChannelState {
    available: bool,
    subscribers: Vec<mpsc::Sender<Notification>>,
    values: HashMap<(String, String), String>,
}

/// In-process controller.
///
/// Publishing fans a notification out to every live subscriber.
/// `disconnect` ends all open streams and `set_available(false)` makes new
/// subscriptions fail, which together simulate a controller outage.
#[derive(Debug, Clone)]
pub struct ChannelController {
    state: Arc<Mutex<ChannelState>>,
}

impl Default for ChannelController {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelController {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                available: true,
                subscribers: Vec::new(),
                values: HashMap::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a new value and notify subscribers, filling `old` from the
    /// previously recorded value. Returns the number of live streams.
    pub fn publish(&self, device: &str, key: &str, new: &str) -> usize {
        let old = self
            .state()
            .values
            .get(&(device.to_string(), key.to_string()))
            .cloned();
        self.publish_notification(Notification::new(device, key, old.as_deref(), new))
    }

    /// Deliver a notification exactly as given (including a missing `old`).
    pub fn publish_notification(&self, notification: Notification) -> usize {
        let mut state = self.state();
        state.values.insert(
            (notification.device.clone(), notification.key.clone()),
            notification.new.clone(),
        );
        state
            .subscribers
            .retain(|tx| match tx.try_send(notification.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(device = %notification.device, key = %notification.key, "subscriber lagging; notification dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
        state.subscribers.len()
    }

    /// Set a value without notifying anyone.
    pub fn set_value(&self, device: &str, key: &str, value: &str) {
        self.state()
            .values
            .insert((device.to_string(), key.to_string()), value.to_string());
    }

    /// Close every open notification stream.
    pub fn disconnect(&self) {
        self.state().subscribers.clear();
    }

    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    pub fn subscriber_count(&self) -> usize {
        self.state()
            .subscribers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

impl Controller for ChannelController {
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Notification>>> {
        Box::pin(async move {
            let mut state = self.state();
            if !state.available {
                return Err(ScriptdError::ConnectionLost(
                    "controller unavailable".to_string(),
                ));
            }
            let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
            state.subscribers.push(tx);
            Ok(rx)
        })
    }

    fn get_value<'a>(
        &'a self,
        device: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let state = self.state();
            if !state.available {
                return Err(ScriptdError::ConnectionLost(
                    "controller unavailable".to_string(),
                ));
            }
            Ok(state
                .values
                .get(&(device.to_string(), key.to_string()))
                .cloned())
        })
    }
}
