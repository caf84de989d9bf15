// src/clock/mod.rs

//! Clock scheduler: the single source of time-based fire intents.
//!
//! - [`queue`] is the pure min-heap of next-fire times, driven by explicit
//!   `now` values so it can be tested without a live clock.
//! - [`ticker`] is the async loop that wakes up periodically, pops due
//!   triggers and sends fire intents to the dispatcher.

pub mod queue;
pub mod ticker;

pub use queue::{ClockFire, ClockQueue};
pub use ticker::spawn_clock;
