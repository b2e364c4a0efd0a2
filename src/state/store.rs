//! The narrow interface the router uses to reach workflow state.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::models::{ResourceContent, ResourceDescriptor, StateChange, ToolContent, ToolDescriptor};
use crate::error::StoreError;

/// Resource and tool provider backing the MCP operations.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Every resource currently exposed.
    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, StoreError>;

    /// Reads one resource; fails for URIs outside the served namespaces.
    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, StoreError>;

    /// Every tool the store implements.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, StoreError>;

    /// Invokes a tool with already-shape-checked arguments.
    async fn call_tool(&self, name: &str, args: Value) -> Result<ToolContent, StoreError>;

    /// Stream of change notifications, starting from now.
    fn subscribe(&self) -> broadcast::Receiver<StateChange>;
}
