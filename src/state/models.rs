//! Workflow State Models
//!
//! Descriptors handed to the router, the cycle record kept on disk, and the
//! change notifications the store publishes.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Protocol-facing descriptors
// =============================================================================

/// A read-only document addressable by URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

/// A callable operation and the JSON schema of its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Top-level property names the schema marks as required.
    pub fn required_arguments(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Body of a resource as returned by `resources/read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

/// Single content object produced by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        ToolContent::Text { text: text.into() }
    }
}

// =============================================================================
// Workflow domain
// =============================================================================

/// The five FORGE phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Focus,
    Orchestrate,
    Refine,
    Generate,
    Evaluate,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Focus,
        Phase::Orchestrate,
        Phase::Refine,
        Phase::Generate,
        Phase::Evaluate,
    ];

    /// Phase that follows this one, `None` after `Evaluate`.
    pub fn next(self) -> Option<Phase> {
        let idx = Phase::ALL.iter().position(|p| *p == self)?;
        Phase::ALL.get(idx + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Focus => "focus",
            Phase::Orchestrate => "orchestrate",
            Phase::Refine => "refine",
            Phase::Generate => "generate",
            Phase::Evaluate => "evaluate",
        }
    }

    pub fn parse(s: &str) -> Option<Phase> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One development cycle, persisted as a Markdown file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub id: String,
    pub feature: String,
    pub description: String,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Change notifications
// =============================================================================

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Added,
    Changed,
    Removed,
}

/// Notification published by the store after each write.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    /// Raw file-level change, path relative to the project root.
    File { kind: FileChangeKind, path: PathBuf },
    /// A cycle moved to its next phase.
    PhaseAdvanced {
        cycle_id: String,
        from: Phase,
        to: Phase,
    },
    /// A cycle finished its last phase and was archived.
    TaskCompleted { cycle_id: String, summary: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phases_advance_in_order_and_stop_after_evaluate() {
        assert_eq!(Phase::Focus.next(), Some(Phase::Orchestrate));
        assert_eq!(Phase::Generate.next(), Some(Phase::Evaluate));
        assert_eq!(Phase::Evaluate.next(), None);
    }

    #[test]
    fn phase_parse_is_case_insensitive() {
        assert_eq!(Phase::parse(" Refine "), Some(Phase::Refine));
        assert_eq!(Phase::parse("deploy"), None);
    }

    #[test]
    fn required_arguments_reads_schema() {
        let tool = ToolDescriptor {
            name: "t".into(),
            description: String::new(),
            input_schema: json!({"type": "object", "required": ["a", "b"]}),
        };
        assert_eq!(tool.required_arguments(), vec!["a", "b"]);
    }

    #[test]
    fn tool_content_serializes_with_type_tag() {
        let value = serde_json::to_value(ToolContent::text("hi")).unwrap();
        assert_eq!(value, json!({"type": "text", "text": "hi"}));
    }
}
