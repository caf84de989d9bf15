// src/watch/mod.rs

//! Event watcher: turns controller change notifications into fire intents.
//!
//! - [`controller`]: the `Controller` interface, the `Notification` message
//!   and the in-process `ChannelController`.
//! - [`line`]: `LineController`, a TCP client speaking newline-delimited JSON.
//! - [`condition`]: edge-condition evaluation and notification matching.
//! - [`watcher`]: the subscription loop with reconnect backoff.

pub mod condition;
pub mod controller;
pub mod line;
pub mod watcher;

pub use condition::{match_notification, values_equal};
pub use controller::{BoxFuture, ChannelController, Controller, Notification};
pub use line::LineController;
pub use watcher::{spawn_event_watcher, Backoff};
