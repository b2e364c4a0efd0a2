//! File-backed workflow state.
//!
//! Layout under the project root:
//!
//! ```text
//! .forge/
//!   context.md
//!   templates/<name>.md
//!   cycles/active/<id>.md
//!   cycles/archive/<id>.md
//! ```
//!
//! Read-modify-write sequences on one cycle are serialised by a per-cycle
//! async mutex, so concurrent `tools/call` requests against the same cycle
//! cannot lose each other's updates. A mutex exists only while some call
//! on that cycle is in flight.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::helpers::{
    is_safe_name, new_cycle_id, parse_cycle, render_cycle, resource_uri, split_uri,
};
use super::models::{
    Cycle, FileChangeKind, Phase, ResourceContent, ResourceDescriptor, StateChange, ToolContent,
    ToolDescriptor,
};
use super::store::StateStore;
use crate::error::StoreError;

/// Path segment identifying active cycle files.
pub const ACTIVE_CYCLES_SEGMENT: &str = "cycles/active";

pub const NEW_CYCLE_TOOL: &str = "forge_new_cycle";
pub const STATUS_TOOL: &str = "forge_status";
pub const ADVANCE_PHASE_TOOL: &str = "forge_advance_phase";
pub const COMPLETE_CYCLE_TOOL: &str = "forge_complete_cycle";

const MARKDOWN: &str = "text/markdown";
const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Deserialize)]
struct NewCycleArgs {
    feature: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CycleArgs {
    cycle_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusArgs {
    #[serde(default)]
    cycle_id: Option<String>,
}

/// [`StateStore`] over Markdown files in `<root>/.forge`.
pub struct FileStateStore {
    root: PathBuf,
    forge_dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
    changes: broadcast::Sender<StateChange>,
}

impl FileStateStore {
    /// Creates a store rooted at the project directory. Nothing is touched on
    /// disk until [`FileStateStore::init`] or the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let forge_dir = root.join(".forge");
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            root,
            forge_dir,
            locks: DashMap::new(),
            changes,
        }
    }

    /// Creates the directory skeleton and default documents if missing.
    pub async fn init(&self) -> Result<(), StoreError> {
        for dir in [self.templates_dir(), self.active_dir(), self.archive_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let context = self.context_path();
        if !tokio::fs::try_exists(&context).await? {
            tokio::fs::write(&context, "# Project Context\n\nDescribe the project here.\n")
                .await?;
        }

        for phase in Phase::ALL {
            let path = self.templates_dir().join(format!("{phase}.md"));
            if !tokio::fs::try_exists(&path).await? {
                let title = capitalize(phase.as_str());
                tokio::fs::write(&path, format!("# {title} Phase\n\n## Checklist\n\n- [ ] \n"))
                    .await?;
            }
        }

        info!(dir = %self.forge_dir.display(), "workflow state ready");
        Ok(())
    }

    fn templates_dir(&self) -> PathBuf {
        self.forge_dir.join("templates")
    }

    fn active_dir(&self) -> PathBuf {
        self.forge_dir.join(ACTIVE_CYCLES_SEGMENT)
    }

    fn archive_dir(&self) -> PathBuf {
        self.forge_dir.join("cycles/archive")
    }

    fn context_path(&self) -> PathBuf {
        self.forge_dir.join("context.md")
    }

    fn cycle_path(&self, id: &str) -> PathBuf {
        self.active_dir().join(format!("{id}.md"))
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(id.to_string()).or_default().clone()
    }

    /// Runs `op` on the freshly loaded cycle while holding its lock.
    ///
    /// Unknown ids fail before any lock is created, and the lock entry is
    /// removed afterwards unless another call is still waiting on it.
    async fn with_cycle<T, F, Fut>(&self, id: &str, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(Cycle) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        if !is_safe_name(id) || !tokio::fs::try_exists(self.cycle_path(id)).await? {
            return Err(StoreError::CycleNotFound(id.to_string()));
        }

        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            match self.load_cycle(id).await {
                Ok(cycle) => op(cycle).await,
                Err(e) => Err(e),
            }
        };

        drop(lock);
        self.locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Path as reported in change notifications: relative to the project root.
    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root).unwrap_or(path).to_path_buf()
    }

    fn publish(&self, change: StateChange) {
        // No receivers is normal in tests and before the broadcaster starts.
        if self.changes.send(change).is_err() {
            debug!("state change dropped, no subscribers");
        }
    }

    fn publish_file(&self, kind: FileChangeKind, path: &Path) {
        self.publish(StateChange::File {
            kind,
            path: self.relative(path),
        });
    }

    async fn load_cycle(&self, id: &str) -> Result<Cycle, StoreError> {
        if !is_safe_name(id) {
            return Err(StoreError::CycleNotFound(id.to_string()));
        }
        let path = self.cycle_path(id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::CycleNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        parse_cycle(&text).map_err(|reason| StoreError::MalformedCycle {
            path: self.relative(&path).display().to_string(),
            reason,
        })
    }

    async fn active_cycles(&self) -> Result<Vec<Cycle>, StoreError> {
        let mut cycles = Vec::new();
        for id in list_stems(&self.active_dir()).await? {
            match self.load_cycle(&id).await {
                Ok(cycle) => cycles.push(cycle),
                Err(e) => warn!(cycle = %id, error = %e, "skipping unreadable cycle"),
            }
        }
        Ok(cycles)
    }

    // =========================================================================
    // Tools
    // =========================================================================

    async fn new_cycle(&self, args: NewCycleArgs) -> Result<ToolContent, StoreError> {
        let feature = args.feature.trim();
        if feature.is_empty() {
            return Err(StoreError::InvalidArguments(
                "feature must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let cycle = Cycle {
            id: new_cycle_id(feature),
            feature: feature.to_string(),
            description: args.description.unwrap_or_default(),
            phase: Phase::Focus,
            created_at: now,
            updated_at: now,
        };

        tokio::fs::create_dir_all(self.active_dir()).await?;
        let path = self.cycle_path(&cycle.id);
        tokio::fs::write(&path, render_cycle(&cycle)).await?;
        info!(cycle = %cycle.id, "cycle created");
        self.publish_file(FileChangeKind::Added, &path);

        Ok(ToolContent::text(format!(
            "Created cycle {} for \"{}\" in phase {}.",
            cycle.id, cycle.feature, cycle.phase
        )))
    }

    async fn status(&self, args: StatusArgs) -> Result<ToolContent, StoreError> {
        if let Some(id) = args.cycle_id {
            let cycle = self.load_cycle(&id).await?;
            return Ok(ToolContent::text(format!(
                "Cycle {} (\"{}\") is in phase {}; last updated {}.",
                cycle.id,
                cycle.feature,
                cycle.phase,
                cycle.updated_at.to_rfc3339()
            )));
        }

        let cycles = self.active_cycles().await?;
        if cycles.is_empty() {
            return Ok(ToolContent::text("No active cycles."));
        }
        let lines: Vec<String> = cycles
            .iter()
            .map(|c| format!("- {} (\"{}\"): {}", c.id, c.feature, c.phase))
            .collect();
        Ok(ToolContent::text(format!(
            "{} active cycle(s):\n{}",
            cycles.len(),
            lines.join("\n")
        )))
    }

    async fn advance_phase(&self, args: CycleArgs) -> Result<ToolContent, StoreError> {
        self.with_cycle(&args.cycle_id, |cycle| self.write_next_phase(cycle))
            .await
    }

    async fn write_next_phase(&self, mut cycle: Cycle) -> Result<ToolContent, StoreError> {
        let from = cycle.phase;
        let to = from
            .next()
            .ok_or_else(|| StoreError::FinalPhase(cycle.id.clone()))?;
        cycle.phase = to;
        cycle.updated_at = Utc::now();

        let path = self.cycle_path(&cycle.id);
        tokio::fs::write(&path, render_cycle(&cycle)).await?;
        info!(cycle = %cycle.id, %from, %to, "phase advanced");
        self.publish_file(FileChangeKind::Changed, &path);
        self.publish(StateChange::PhaseAdvanced {
            cycle_id: cycle.id.clone(),
            from,
            to,
        });

        Ok(ToolContent::text(format!(
            "Cycle {} advanced from {} to {}.",
            cycle.id, from, to
        )))
    }

    async fn complete_cycle(&self, args: CycleArgs) -> Result<ToolContent, StoreError> {
        self.with_cycle(&args.cycle_id, |cycle| self.archive(cycle))
            .await
    }

    async fn archive(&self, cycle: Cycle) -> Result<ToolContent, StoreError> {
        if cycle.phase != Phase::Evaluate {
            return Err(StoreError::InvalidArguments(format!(
                "cycle {} is in phase {}; only cycles in evaluate can be completed",
                cycle.id, cycle.phase
            )));
        }

        tokio::fs::create_dir_all(self.archive_dir()).await?;
        let from = self.cycle_path(&cycle.id);
        let to = self.archive_dir().join(format!("{}.md", cycle.id));
        tokio::fs::rename(&from, &to).await?;
        info!(cycle = %cycle.id, "cycle archived");

        self.publish_file(FileChangeKind::Removed, &from);
        self.publish(StateChange::TaskCompleted {
            cycle_id: cycle.id.clone(),
            summary: cycle.feature.clone(),
        });

        Ok(ToolContent::text(format!(
            "Cycle {} (\"{}\") completed and archived.",
            cycle.id, cycle.feature
        )))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, StoreError> {
        let mut resources = Vec::new();

        if tokio::fs::try_exists(self.context_path()).await? {
            resources.push(ResourceDescriptor {
                uri: resource_uri("context", "project"),
                name: "Project context".to_string(),
                description: "Project-wide context shared by every cycle".to_string(),
                mime_type: MARKDOWN.to_string(),
            });
        }

        for name in list_stems(&self.templates_dir()).await? {
            resources.push(ResourceDescriptor {
                uri: resource_uri("templates", &name),
                name: format!("Template: {name}"),
                description: format!("Markdown template {name}"),
                mime_type: MARKDOWN.to_string(),
            });
        }

        for cycle in self.active_cycles().await? {
            resources.push(ResourceDescriptor {
                uri: resource_uri("cycles", &cycle.id),
                name: format!("Cycle: {}", cycle.feature),
                description: format!("Active cycle in phase {}", cycle.phase),
                mime_type: MARKDOWN.to_string(),
            });
        }

        Ok(resources)
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, StoreError> {
        let (namespace, name) =
            split_uri(uri).ok_or_else(|| StoreError::UnknownNamespace(uri.to_string()))?;

        let path = match namespace {
            "context" if name == "project" => self.context_path(),
            "templates" if is_safe_name(name) => self.templates_dir().join(format!("{name}.md")),
            "cycles" if is_safe_name(name) => self.cycle_path(name),
            "context" | "templates" | "cycles" => {
                return Err(StoreError::ResourceNotFound(uri.to_string()))
            }
            _ => return Err(StoreError::UnknownNamespace(uri.to_string())),
        };

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::ResourceNotFound(uri.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(ResourceContent {
            uri: uri.to_string(),
            mime_type: MARKDOWN.to_string(),
            text,
        })
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, StoreError> {
        Ok(tool_descriptors())
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<ToolContent, StoreError> {
        match name {
            NEW_CYCLE_TOOL => self.new_cycle(decode_args(args)?).await,
            STATUS_TOOL => self.status(decode_args(args)?).await,
            ADVANCE_PHASE_TOOL => self.advance_phase(decode_args(args)?).await,
            COMPLETE_CYCLE_TOOL => self.complete_cycle(decode_args(args)?).await,
            _ => Err(StoreError::UnknownTool(name.to_string())),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }
}

fn decode_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, StoreError> {
    serde_json::from_value(args).map_err(|e| StoreError::InvalidArguments(e.to_string()))
}

/// Sorted `.md` file stems in `dir`; a missing directory is empty.
async fn list_stems(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut stems = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if is_safe_name(stem) {
                stems.push(stem.to_string());
            }
        }
    }
    stems.sort();
    Ok(stems)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn tool_descriptors() -> Vec<ToolDescriptor> {
    let cycle_id = json!({ "type": "string", "description": "Identifier of an active cycle" });
    vec![
        ToolDescriptor {
            name: NEW_CYCLE_TOOL.to_string(),
            description: "Starts a new development cycle in the focus phase.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "feature": { "type": "string", "description": "Feature being built" },
                    "description": { "type": "string" }
                },
                "required": ["feature"]
            }),
        },
        ToolDescriptor {
            name: STATUS_TOOL.to_string(),
            description: "Reports one cycle, or every active cycle when no id is given."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "cycleId": cycle_id }
            }),
        },
        ToolDescriptor {
            name: ADVANCE_PHASE_TOOL.to_string(),
            description: "Moves a cycle to its next phase.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "cycleId": cycle_id },
                "required": ["cycleId"]
            }),
        },
        ToolDescriptor {
            name: COMPLETE_CYCLE_TOOL.to_string(),
            description: "Archives a cycle that has reached the evaluate phase.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "cycleId": cycle_id },
                "required": ["cycleId"]
            }),
        },
    ]
}
