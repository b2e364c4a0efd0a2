//! Broadcast event shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CONNECTED: &str = "connected";
pub const CONFIG_UPDATED: &str = "config-updated";
pub const CYCLE_CREATED: &str = "cycle-created";
pub const CYCLE_ARCHIVED: &str = "cycle-archived";
pub const PHASE_ADVANCED: &str = "phase-advanced";
pub const AGENT_INVOKED: &str = "agent-invoked";
pub const TASK_COMPLETED: &str = "task-completed";
pub const DELEGATION: &str = "delegation";
pub const STATUS: &str = "status";

/// Event pushed to every live subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl BroadcastEvent {
    /// Event stamped with the current time.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Rolling counters over the retained history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total: usize,
    pub last_hour: usize,
    pub last_day: usize,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscribers that accepted the event.
    pub delivered: usize,
    /// Subscribers removed because their connection was gone.
    pub dropped: usize,
}
