//! Live SSE subscriber set.
//!
//! Each subscriber is a bounded channel whose receiving half feeds one
//! HTTP event stream. A failed send means the stream is gone or has stopped
//! draining its queue, so broadcast removes that subscriber and carries on
//! with the rest.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{BroadcastEvent, DeliveryReport, EventSink};

/// Events queued per subscriber before it counts as stalled.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Receiving half handed to the SSE stream of one subscriber.
pub type SubscriberReceiver = mpsc::Receiver<BroadcastEvent>;

/// Connections currently eligible for broadcasts.
///
/// Owned by one SSE listener and shared by `Arc` with its handlers and the
/// event broadcaster.
#[derive(Debug)]
pub struct SubscriberSet {
    clients: DashMap<Uuid, mpsc::Sender<BroadcastEvent>>,
    queue_capacity: usize,
}

impl Default for SubscriberSet {
    fn default() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            clients: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Adds a subscriber and returns its id and event receiver.
    pub fn register(&self) -> (Uuid, SubscriberReceiver) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        self.clients.insert(id, tx);
        debug!(client = %id, total = self.clients.len(), "subscriber registered");
        (id, rx)
    }

    /// Removes a subscriber. Safe to call any number of times.
    pub fn deregister(&self, id: &Uuid) -> bool {
        let removed = self.clients.remove(id).is_some();
        if removed {
            debug!(client = %id, total = self.clients.len(), "subscriber removed");
        }
        removed
    }

    /// Sends to one subscriber, dropping it if its stream is gone or stalled.
    pub fn send_to(&self, id: &Uuid, event: BroadcastEvent) -> bool {
        let sent = match self.clients.get(id) {
            Some(tx) => tx.try_send(event).is_ok(),
            None => return false,
        };
        if !sent {
            self.deregister(id);
        }
        sent
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Delivers `event` to every subscriber.
    ///
    /// Iterates over a snapshot so that removals never touch the map while
    /// it is being walked.
    pub fn broadcast(&self, event: &BroadcastEvent) -> DeliveryReport {
        let snapshot: Vec<(Uuid, mpsc::Sender<BroadcastEvent>)> = self
            .clients
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut report = DeliveryReport::default();
        let mut broken = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => broken.push((id, "queue full")),
                Err(TrySendError::Closed(_)) => broken.push((id, "disconnected")),
            }
        }

        for (id, reason) in broken {
            warn!(client = %id, event = %event.event_type, reason, "dropping subscriber");
            if self.deregister(&id) {
                report.dropped += 1;
            }
        }
        report
    }
}

impl EventSink for SubscriberSet {
    fn broadcast(&self, event: &BroadcastEvent) -> DeliveryReport {
        SubscriberSet::broadcast(self, event)
    }
}

/// Deregisters its subscriber when dropped, i.e. when the HTTP stream ends.
pub struct SubscriberGuard {
    set: Arc<SubscriberSet>,
    id: Uuid,
}

impl SubscriberGuard {
    pub fn new(set: Arc<SubscriberSet>, id: Uuid) -> Self {
        Self { set, id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.set.deregister(&self.id);
    }
}
