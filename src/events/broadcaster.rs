//! Event broadcaster
//!
//! Turns state-store notifications into [`BroadcastEvent`]s, keeps a bounded
//! most-recent-first history, and pushes every event to an optional sink
//! (the SSE subscriber set when serving over HTTP).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::models::*;
use crate::state::{FileChangeKind, Phase, StateChange, ACTIVE_CYCLES_SEGMENT};

/// Anything that can fan an event out to connected clients.
pub trait EventSink: Send + Sync {
    fn broadcast(&self, event: &BroadcastEvent) -> DeliveryReport;
}

/// Records events and forwards them to the sink.
pub struct EventBroadcaster {
    sink: Option<Arc<dyn EventSink>>,
    history: Mutex<VecDeque<BroadcastEvent>>,
    max_history: usize,
}

impl EventBroadcaster {
    /// Broadcaster with no sink; events are only recorded.
    pub fn new(max_history: usize) -> Self {
        Self {
            sink: None,
            // Grows on demand; `max_history` comes straight from the CLI.
            history: Mutex::new(VecDeque::new()),
            max_history,
        }
    }

    /// Attaches the sink every event is delivered to.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Records `event` at the front of the history and fans it out.
    pub fn push(&self, event: BroadcastEvent) -> DeliveryReport {
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push_front(event.clone());
            history.truncate(self.max_history);
        }

        let report = match &self.sink {
            Some(sink) => sink.broadcast(&event),
            None => DeliveryReport::default(),
        };
        debug!(
            event = %event.event_type,
            delivered = report.delivered,
            dropped = report.dropped,
            "event broadcast"
        );
        report
    }

    /// Snapshot of the retained events, most recent first.
    pub fn history(&self) -> Vec<BroadcastEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Counts over the retained history.
    pub fn stats(&self) -> EventStats {
        let now = Utc::now();
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::days(1);
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        EventStats {
            total: history.len(),
            last_hour: history.iter().filter(|e| e.timestamp > hour_ago).count(),
            last_day: history.iter().filter(|e| e.timestamp > day_ago).count(),
        }
    }

    /// Translates and pushes one state change; unclassified changes are dropped.
    pub fn handle_change(&self, change: &StateChange) -> Option<DeliveryReport> {
        let event = match change {
            StateChange::File { .. } => classify_file_change(change)?,
            StateChange::PhaseAdvanced { cycle_id, from, to } => {
                return Some(self.phase_advanced(cycle_id, *from, *to))
            }
            StateChange::TaskCompleted { cycle_id, summary } => {
                return Some(self.task_completed(cycle_id, summary))
            }
        };
        Some(self.push(event))
    }

    /// Consumes notifications until the store goes away.
    pub async fn run(self: Arc<Self>, mut changes: broadcast::Receiver<StateChange>) {
        info!("event broadcaster listening for state changes");
        loop {
            match changes.recv().await {
                Ok(change) => {
                    self.handle_change(&change);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event broadcaster lagged behind state changes");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("state change channel closed, broadcaster stopping");
    }

    // =========================================================================
    // Domain events
    // =========================================================================

    pub fn cycle_created(&self, cycle_id: &str, feature: &str) -> DeliveryReport {
        self.push(BroadcastEvent::new(
            CYCLE_CREATED,
            json!({ "cycleId": cycle_id, "feature": feature }),
        ))
    }

    pub fn phase_advanced(&self, cycle_id: &str, from: Phase, to: Phase) -> DeliveryReport {
        self.push(BroadcastEvent::new(
            PHASE_ADVANCED,
            json!({ "cycleId": cycle_id, "from": from, "to": to }),
        ))
    }

    pub fn agent_invoked(&self, agent: &str, cycle_id: Option<&str>) -> DeliveryReport {
        self.push(BroadcastEvent::new(
            AGENT_INVOKED,
            json!({ "agent": agent, "cycleId": cycle_id }),
        ))
    }

    pub fn task_completed(&self, cycle_id: &str, summary: &str) -> DeliveryReport {
        self.push(BroadcastEvent::new(
            TASK_COMPLETED,
            json!({ "cycleId": cycle_id, "summary": summary }),
        ))
    }

    pub fn delegation(&self, task: &str, delegate: &str) -> DeliveryReport {
        self.push(BroadcastEvent::new(
            DELEGATION,
            json!({ "task": task, "delegate": delegate }),
        ))
    }

    pub fn status(&self, message: &str, details: Value) -> DeliveryReport {
        self.push(BroadcastEvent::new(
            STATUS,
            json!({ "message": message, "details": details }),
        ))
    }
}

/// Heuristic classifier for raw file notifications.
///
/// YAML files map to `config-updated`; additions and removals under the
/// active-cycles directory map to `cycle-created` / `cycle-archived`.
/// Anything else yields `None`.
pub fn classify_file_change(change: &StateChange) -> Option<BroadcastEvent> {
    let StateChange::File { kind, path } = change else {
        return None;
    };
    let path_str = path.to_string_lossy().replace('\\', "/");
    let data = || {
        json!({
            "path": path_str,
            "cycleId": path.file_stem().map(|s| s.to_string_lossy().into_owned()),
        })
    };

    if path_str.contains(".yaml") || path_str.contains(".yml") {
        return Some(BroadcastEvent::new(
            CONFIG_UPDATED,
            json!({ "path": path_str, "change": kind }),
        ));
    }

    if !path_str.contains(ACTIVE_CYCLES_SEGMENT) {
        return None;
    }
    match kind {
        FileChangeKind::Added => Some(BroadcastEvent::new(CYCLE_CREATED, data())),
        FileChangeKind::Removed => Some(BroadcastEvent::new(CYCLE_ARCHIVED, data())),
        FileChangeKind::Changed => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Sink that counts deliveries.
    #[derive(Default)]
    struct CountingSink {
        seen: Mutex<Vec<String>>,
    }

    impl EventSink for CountingSink {
        fn broadcast(&self, event: &BroadcastEvent) -> DeliveryReport {
            self.seen.lock().unwrap().push(event.event_type.clone());
            DeliveryReport {
                delivered: 1,
                dropped: 0,
            }
        }
    }

    fn file(kind: FileChangeKind, path: &str) -> StateChange {
        StateChange::File {
            kind,
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn history_is_bounded_most_recent_first() {
        let broadcaster = EventBroadcaster::new(5);
        for i in 0..8 {
            broadcaster.push(BroadcastEvent::new(STATUS, json!({ "n": i })));
        }

        let history = broadcaster.history();
        assert_eq!(history.len(), 5);
        let order: Vec<i64> = history.iter().map(|e| e.data["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![7, 6, 5, 4, 3]);
    }

    #[test]
    fn huge_history_bound_allocates_lazily() {
        let broadcaster = EventBroadcaster::new(usize::MAX);
        broadcaster.status("one", Value::Null);
        assert_eq!(broadcaster.history().len(), 1);
        assert_eq!(broadcaster.stats().total, 1);
    }

    #[test]
    fn stats_count_recent_events() {
        let broadcaster = EventBroadcaster::new(10);
        broadcaster.status("a", Value::Null);
        broadcaster.push(BroadcastEvent {
            event_type: STATUS.into(),
            data: Value::Null,
            timestamp: Utc::now() - Duration::hours(3),
        });
        broadcaster.push(BroadcastEvent {
            event_type: STATUS.into(),
            data: Value::Null,
            timestamp: Utc::now() - Duration::days(2),
        });

        assert_eq!(
            broadcaster.stats(),
            EventStats {
                total: 3,
                last_hour: 1,
                last_day: 2
            }
        );
    }

    #[test]
    fn classifier_follows_path_shape() {
        let event = classify_file_change(&file(FileChangeKind::Changed, ".forge/config.yaml"));
        assert_eq!(event.unwrap().event_type, CONFIG_UPDATED);

        let event = classify_file_change(&file(
            FileChangeKind::Added,
            ".forge/cycles/active/login-1a2b3c4d.md",
        ))
        .unwrap();
        assert_eq!(event.event_type, CYCLE_CREATED);
        assert_eq!(event.data["cycleId"], "login-1a2b3c4d");

        let event = classify_file_change(&file(FileChangeKind::Removed, ".forge/cycles/active/x.md"));
        assert_eq!(event.unwrap().event_type, CYCLE_ARCHIVED);

        assert!(classify_file_change(&file(FileChangeKind::Changed, ".forge/cycles/active/x.md"))
            .is_none());
        assert!(classify_file_change(&file(FileChangeKind::Added, ".forge/context.md")).is_none());
    }

    #[test]
    fn domain_changes_use_typed_events() {
        let sink = Arc::new(CountingSink::default());
        let broadcaster = EventBroadcaster::new(10).with_sink(sink.clone());

        broadcaster.handle_change(&StateChange::PhaseAdvanced {
            cycle_id: "c".into(),
            from: Phase::Focus,
            to: Phase::Orchestrate,
        });
        broadcaster.handle_change(&StateChange::TaskCompleted {
            cycle_id: "c".into(),
            summary: "done".into(),
        });
        assert!(broadcaster
            .handle_change(&file(FileChangeKind::Added, "README.md"))
            .is_none());

        assert_eq!(
            *sink.seen.lock().unwrap(),
            vec![PHASE_ADVANCED.to_string(), TASK_COMPLETED.to_string()]
        );
        assert_eq!(broadcaster.history()[1].data["to"], "orchestrate");
    }

    #[test]
    fn convenience_operations_tag_events() {
        let broadcaster = EventBroadcaster::new(10);
        broadcaster.cycle_created("c1", "Search");
        broadcaster.agent_invoked("reviewer", Some("c1"));
        broadcaster.delegation("write tests", "generator");
        broadcaster.status("idle", json!({ "queue": 0 }));

        let history = broadcaster.history();
        let types: Vec<&str> = history.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec![STATUS, DELEGATION, AGENT_INVOKED, CYCLE_CREATED]);
        assert_eq!(history[1].data["delegate"], "generator");
        assert_eq!(history[2].data["cycleId"], "c1");
    }

    #[tokio::test]
    async fn run_drains_channel_until_closed() {
        let (tx, rx) = broadcast::channel(8);
        let broadcaster = Arc::new(EventBroadcaster::new(10));
        let task = tokio::spawn(broadcaster.clone().run(rx));

        tx.send(file(FileChangeKind::Added, ".forge/cycles/active/a.md"))
            .unwrap();
        tx.send(file(FileChangeKind::Changed, "notes.txt")).unwrap();
        drop(tx);
        task.await.unwrap();

        let history = broadcaster.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, CYCLE_CREATED);
    }
}
