//! Workflow State Module
//!
//! The resource and tool provider behind the MCP operations:
//! - Domain models (phases, cycles, descriptors, change notifications)
//! - The `StateStore` interface the router depends on
//! - A Markdown file-backed implementation with per-cycle locking

pub mod file_store;
pub mod helpers;
pub mod models;
pub mod store;

// Re-export commonly used types for convenience
pub use file_store::{FileStateStore, ACTIVE_CYCLES_SEGMENT};
pub use models::{
    Cycle, FileChangeKind, Phase, ResourceContent, ResourceDescriptor, StateChange, ToolContent,
    ToolDescriptor,
};
pub use store::StateStore;
