//! MCP Protocol Models and Constants
//!
//! This module contains the request envelope, the typed method set and the
//! constants the server advertises during the handshake.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::McpError;

// =============================================================================
// MCP Constants
// =============================================================================

/// Server identifier
pub const SERVER_NAME: &str = "forge-mcp";
/// Server version reported in `serverInfo`
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Human readable server description
pub const SERVER_DESCRIPTION: &str =
    "FORGE workflow server: Focus, Orchestrate, Refine, Generate, Evaluate";
/// Protocol version for MCP
pub const PROTOCOL_VERSION: &str = "2024-11-05";
/// JSON-RPC version string carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";
/// Error code used for every failure the server reports
pub const INTERNAL_ERROR: i32 = -32603;
/// Method prefix for client notifications
pub const NOTIFICATION_PREFIX: &str = "notifications/";

// =============================================================================
// MCP Protocol Models
// =============================================================================

/// Standard JSON-RPC 2.0 Request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version (should be "2.0"); not enforced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,

    /// Method name to invoke
    pub method: String,

    /// Parameters for the method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Request identifier; `None` when the member is absent, `Some(Null)` when null
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
}

/// Keeps an explicit `null` as `Some(Value::Null)` so that only a missing
/// member reads as `None`.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl JsonRpcRequest {
    /// Builds a request, mostly useful in tests.
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<Value>) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            method: method.into(),
            params,
            id,
        }
    }

    /// Identifier to echo back; absent ids become `null`.
    pub fn response_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }

    /// A client notification expects no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.starts_with(NOTIFICATION_PREFIX)
    }
}

/// The closed set of operations the router dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpMethod {
    Initialize,
    ResourcesList,
    ResourcesRead,
    ToolsList,
    ToolsCall,
    Ping,
}

impl McpMethod {
    /// Wire name of the method.
    pub fn as_str(self) -> &'static str {
        match self {
            McpMethod::Initialize => "initialize",
            McpMethod::ResourcesList => "resources/list",
            McpMethod::ResourcesRead => "resources/read",
            McpMethod::ToolsList => "tools/list",
            McpMethod::ToolsCall => "tools/call",
            McpMethod::Ping => "ping",
        }
    }
}

impl std::str::FromStr for McpMethod {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialize" => Ok(McpMethod::Initialize),
            "resources/list" => Ok(McpMethod::ResourcesList),
            "resources/read" => Ok(McpMethod::ResourcesRead),
            "tools/list" => Ok(McpMethod::ToolsList),
            "tools/call" => Ok(McpMethod::ToolsCall),
            "ping" => Ok(McpMethod::Ping),
            other => Err(McpError::UnknownMethod(other.to_string())),
        }
    }
}

/// Parameters of `resources/read`.
#[derive(Debug, Deserialize)]
pub struct ReadResourceParams {
    pub uri: String,
}

/// Parameters of `tools/call`.
#[derive(Debug, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_method_round_trips_through_its_name() {
        for method in [
            McpMethod::Initialize,
            McpMethod::ResourcesList,
            McpMethod::ResourcesRead,
            McpMethod::ToolsList,
            McpMethod::ToolsCall,
            McpMethod::Ping,
        ] {
            assert_eq!(method.as_str().parse::<McpMethod>().unwrap(), method);
        }
    }

    #[test]
    fn unknown_method_is_rejected() {
        let err = "prompts/list".parse::<McpMethod>().unwrap_err();
        assert!(err.to_string().contains("prompts/list"));
    }

    #[test]
    fn missing_id_is_distinguished_from_null() {
        let absent: JsonRpcRequest =
            serde_json::from_value(json!({"method": "notifications/initialized"})).unwrap();
        assert!(absent.id.is_none());
        assert!(absent.is_notification());

        let null: JsonRpcRequest =
            serde_json::from_value(json!({"method": "ping", "id": null})).unwrap();
        assert_eq!(null.response_id(), Value::Null);
        assert!(!null.is_notification());
    }
}
