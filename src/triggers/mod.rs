// src/triggers/mod.rs

//! Trigger definitions and the persisted trigger store.
//!
//! - [`model`]: `Trigger`, its schedule/event payloads and edge conditions.
//! - [`recurrence`]: recurrence rules and the pure `next_fire` function.
//! - [`store`]: validated, persisted set of triggers.

pub mod model;
pub mod recurrence;
pub mod store;

pub use model::{CrossDirection, EdgeCondition, NewTrigger, Trigger, TriggerKind, TriggerPatch};
pub use recurrence::{next_fire, CalendarSpec, Recurrence};
pub use store::TriggerStore;
