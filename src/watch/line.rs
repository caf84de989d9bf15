// src/watch/line.rs

//! TCP controller client speaking newline-delimited JSON.
//!
//! Every connection starts with one request line:
//!
//! - `{"op":"subscribe"}`: the server then streams one notification object
//!   per line (`{"device":..,"key":..,"old":..,"new":..}`) until it closes
//!   the connection.
//! - `{"op":"get","device":..,"key":..}`: the server answers with a single
//!   `{"value":..}` line, `null` when the key is unknown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{Result, ScriptdError};

use super::controller::{BoxFuture, Controller, Notification, SUBSCRIPTION_BUFFER};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on a whole `get` exchange, connect included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Subscribe,
    Get { device: &'a str, key: &'a str },
}

#[derive(Debug, Deserialize)]
struct GetReply {
    #[serde(default)]
    value: Option<serde_json::Value>,
}

type ValueCache = Arc<Mutex<HashMap<(String, String), String>>>;

/// Controller reached over TCP.
///
/// Values seen on the subscription stream are remembered so a notification
/// that arrives without `old` gets the previously reported value filled in.
#[derive(Debug, Clone)]
pub struct LineController {
    address: String,
    cache: ValueCache,
    request_timeout: Duration,
}

impl LineController {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            cache: Arc::new(Mutex::new(HashMap::new())),
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Bounds how long `get_value` waits for a reply.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self, request: &Request<'_>) -> Result<TcpStream> {
        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.address))
            .await
            .map_err(|_| ScriptdError::ConnectionLost(format!("connect to {} timed out", self.address)))?
            .map_err(|e| ScriptdError::ConnectionLost(format!("connect to {}: {e}", self.address)))?;

        let mut line = serde_json::to_string(request).context("encoding controller request")?;
        line.push('\n');
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ScriptdError::ConnectionLost(format!("write to {}: {e}", self.address)))?;
        Ok(stream)
    }
}

impl Controller for LineController {
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Notification>>> {
        Box::pin(async move {
            let stream = self.connect(&Request::Subscribe).await?;
            info!(address = %self.address, "controller subscription opened");

            let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
            let cache = Arc::clone(&self.cache);
            let address = self.address.clone();

            tokio::spawn(async move {
                let mut lines = BufReader::new(stream).lines();
                loop {
                    let line = match lines.next_line().await {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            debug!(address = %address, "controller closed the subscription");
                            break;
                        }
                        Err(err) => {
                            warn!(address = %address, error = %err, "controller read failed");
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }

                    let mut notification: Notification = match serde_json::from_str(&line) {
                        Ok(n) => n,
                        Err(err) => {
                            warn!(address = %address, error = %err, "skipping malformed notification");
                            continue;
                        }
                    };

                    let previous = cache
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .insert(
                            (notification.device.clone(), notification.key.clone()),
                            notification.new.clone(),
                        );
                    if notification.old.is_none() {
                        notification.old = previous;
                    }

                    if tx.send(notification).await.is_err() {
                        break;
                    }
                }
                // Dropping `tx` ends the stream for the watcher.
            });

            Ok(rx)
        })
    }

    fn get_value<'a>(
        &'a self,
        device: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let exchange = async {
                let stream = self.connect(&Request::Get { device, key }).await?;
                let mut reply = String::new();
                BufReader::new(stream)
                    .read_line(&mut reply)
                    .await
                    .map_err(|e| ScriptdError::ConnectionLost(format!("read from {}: {e}", self.address)))?;
                Ok::<_, ScriptdError>(reply)
            };
            let reply = tokio::time::timeout(self.request_timeout, exchange)
                .await
                .map_err(|_| {
                    ScriptdError::ConnectionLost(format!(
                        "get {device}/{key} from {} timed out after {:?}",
                        self.address, self.request_timeout
                    ))
                })??;

            let reply: GetReply = serde_json::from_str(reply.trim())
                .with_context(|| format!("decoding get reply for {device}/{key}"))?;

            Ok(match reply.value {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(s)) => Some(s),
                Some(other) => Some(other.to_string()),
            })
        })
    }
}
