//! Capability registry advertised by `initialize`.

use serde::Serialize;

use super::models::{PROTOCOL_VERSION, SERVER_DESCRIPTION, SERVER_NAME, SERVER_VERSION};

/// Advertisement for the `resources` group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    pub subscribe: bool,
    pub list_changed: bool,
}

/// Advertisement for the `tools` group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

/// Advertisement for the `prompts` group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    pub list_changed: bool,
}

/// Capability groups keyed by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub resources: ResourcesCapability,
    pub tools: ToolsCapability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
}

/// Identity reported in `serverInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Everything the server tells a client at handshake time.
///
/// Built once at startup and never mutated; the router shares it by `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRegistry {
    pub protocol_version: String,
    pub capabilities: Capabilities,
    pub server_info: ServerInfo,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Capabilities {
                resources: ResourcesCapability {
                    subscribe: true,
                    list_changed: true,
                },
                tools: ToolsCapability {
                    list_changed: false,
                },
                prompts: None,
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
                description: SERVER_DESCRIPTION.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_registry_matches_handshake_shape() {
        let value = serde_json::to_value(CapabilityRegistry::default()).unwrap();
        assert_eq!(value["protocolVersion"], "2024-11-05");
        assert_eq!(
            value["capabilities"],
            json!({
                "resources": { "subscribe": true, "listChanged": true },
                "tools": { "listChanged": false }
            })
        );
        assert_eq!(value["serverInfo"]["name"], "forge-mcp");
        assert!(value["serverInfo"]["description"].is_string());
    }
}
