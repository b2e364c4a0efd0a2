//! Event broadcasting
//!
//! Lifecycle events (cycles, phases, agents, tasks) are translated from
//! state-store notifications, kept in a bounded history, and fanned out to
//! SSE subscribers through the [`EventSink`] seam.

pub mod broadcaster;
pub mod models;

pub use broadcaster::{classify_file_change, EventBroadcaster, EventSink};
pub use models::{BroadcastEvent, DeliveryReport, EventStats};
