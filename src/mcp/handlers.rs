//! MCP request dispatch
//!
//! [`RequestRouter`] maps a decoded request onto one of the six supported
//! operations and returns the bare `result` object. It never builds
//! envelopes: failures come back as [`McpError`] and each transport decides
//! how to present them.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::capabilities::CapabilityRegistry;
use super::models::{CallToolParams, JsonRpcRequest, McpMethod, ReadResourceParams};
use crate::error::{McpError, StoreError};
use crate::state::StateStore;

/// Stateless dispatcher shared by every transport and connection.
#[derive(Clone)]
pub struct RequestRouter {
    registry: Arc<CapabilityRegistry>,
    store: Arc<dyn StateStore>,
}

impl RequestRouter {
    pub fn new(registry: Arc<CapabilityRegistry>, store: Arc<dyn StateStore>) -> Self {
        Self { registry, store }
    }

    /// Registry advertised on `initialize`.
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Dispatches one request and returns its `result` payload.
    pub async fn handle(&self, request: &JsonRpcRequest) -> Result<Value, McpError> {
        let method: McpMethod = request.method.parse()?;
        let params = request.params.as_ref();
        debug!(method = method.as_str(), id = ?request.id, "dispatching request");

        match method {
            McpMethod::Initialize => Ok(self.initialize(params)),
            McpMethod::ResourcesList => {
                let resources = self.store.list_resources().await?;
                Ok(json!({ "resources": resources }))
            }
            McpMethod::ResourcesRead => {
                let read: ReadResourceParams = decode_params(params, "uri")?;
                let content = self.store.read_resource(&read.uri).await?;
                Ok(json!({ "contents": [content] }))
            }
            McpMethod::ToolsList => {
                let tools = self.store.list_tools().await?;
                Ok(json!({ "tools": tools }))
            }
            McpMethod::ToolsCall => {
                let call: CallToolParams = decode_params(params, "name")?;
                self.call_tool(call).await
            }
            McpMethod::Ping => Ok(json!({ "pong": true })),
        }
    }

    /// Client capabilities are logged, not negotiated.
    fn initialize(&self, params: Option<&Value>) -> Value {
        let field = |name: &str| params.and_then(|p| p.get(name)).cloned();
        info!(
            client_protocol = ?field("protocolVersion"),
            client_info = ?field("clientInfo"),
            client_capabilities = ?field("capabilities"),
            "client initialized"
        );
        json!(self.registry.as_ref())
    }

    async fn call_tool(&self, call: CallToolParams) -> Result<Value, McpError> {
        let tools = self.store.list_tools().await?;
        let tool = tools
            .iter()
            .find(|t| t.name == call.name)
            .ok_or_else(|| StoreError::UnknownTool(call.name.clone()))?;

        let args = match call.arguments {
            None | Some(Value::Null) => json!({}),
            Some(obj @ Value::Object(_)) => obj,
            Some(_) => {
                return Err(McpError::InvalidParams(
                    "arguments must be a JSON object".to_string(),
                ))
            }
        };

        let missing: Vec<&str> = tool
            .required_arguments()
            .into_iter()
            .filter(|name| args.get(*name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(McpError::InvalidParams(format!(
                "tool {} is missing required argument(s): {}",
                call.name,
                missing.join(", ")
            )));
        }

        info!(tool = %call.name, "calling tool");
        let content = self.store.call_tool(&call.name, args).await?;
        Ok(json!({ "content": [content] }))
    }
}

/// Decodes `params`, reporting a missing `required` member by name.
fn decode_params<T: DeserializeOwned>(
    params: Option<&Value>,
    required: &'static str,
) -> Result<T, McpError> {
    let params = params
        .filter(|p| p.get(required).is_some_and(|v| !v.is_null()))
        .ok_or(McpError::MissingParam(required))?;
    serde_json::from_value(params.clone()).map_err(|e| McpError::InvalidParams(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        ResourceContent, ResourceDescriptor, StateChange, ToolContent, ToolDescriptor,
    };
    use async_trait::async_trait;
    use tokio::sync::broadcast;

    /// In-memory provider with one resource and one tool.
    struct StubStore {
        changes: broadcast::Sender<StateChange>,
    }

    impl StubStore {
        fn new() -> Self {
            let (changes, _) = broadcast::channel(4);
            Self { changes }
        }
    }

    #[async_trait]
    impl StateStore for StubStore {
        async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, StoreError> {
            Ok(vec![ResourceDescriptor {
                uri: "forge://context/project".into(),
                name: "Project context".into(),
                description: "ctx".into(),
                mime_type: "text/markdown".into(),
            }])
        }

        async fn read_resource(&self, uri: &str) -> Result<ResourceContent, StoreError> {
            if uri != "forge://context/project" {
                return Err(StoreError::UnknownNamespace(uri.to_string()));
            }
            Ok(ResourceContent {
                uri: uri.to_string(),
                mime_type: "text/markdown".into(),
                text: "# Project".into(),
            })
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, StoreError> {
            Ok(vec![ToolDescriptor {
                name: "echo".into(),
                description: "echo".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            }])
        }

        async fn call_tool(&self, name: &str, args: Value) -> Result<ToolContent, StoreError> {
            match name {
                "echo" => Ok(ToolContent::text(args["text"].as_str().unwrap_or_default())),
                other => Err(StoreError::UnknownTool(other.to_string())),
            }
        }

        fn subscribe(&self) -> broadcast::Receiver<StateChange> {
            self.changes.subscribe()
        }
    }

    fn router() -> RequestRouter {
        RequestRouter::new(
            Arc::new(CapabilityRegistry::default()),
            Arc::new(StubStore::new()),
        )
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(method, params, Some(json!(1)))
    }

    #[tokio::test]
    async fn ping_returns_pong_only() {
        let result = router().handle(&request("ping", None)).await.unwrap();
        assert_eq!(result, json!({"pong": true}));
    }

    #[tokio::test]
    async fn initialize_is_identical_across_calls() {
        let router = router();
        let params = json!({"protocolVersion": "1999-01-01", "clientInfo": {"name": "t"}});
        let first = router
            .handle(&request("initialize", Some(params.clone())))
            .await
            .unwrap();
        let second = router
            .handle(&request("initialize", Some(params)))
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first["protocolVersion"], "2024-11-05");
        assert_eq!(first, serde_json::to_value(router.registry()).unwrap());
        assert!(first.get("error").is_none());
    }

    #[tokio::test]
    async fn unknown_method_error_names_method() {
        let err = router()
            .handle(&request("sampling/createMessage", None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sampling/createMessage"));
    }

    #[tokio::test]
    async fn list_results_have_only_their_field() {
        let router = router();
        let resources = router.handle(&request("resources/list", None)).await.unwrap();
        assert_eq!(resources.as_object().unwrap().len(), 1);
        assert_eq!(resources["resources"][0]["mimeType"], "text/markdown");

        let tools = router.handle(&request("tools/list", None)).await.unwrap();
        assert_eq!(tools.as_object().unwrap().len(), 1);
        assert_eq!(tools["tools"][0]["inputSchema"]["required"][0], "text");
    }

    #[tokio::test]
    async fn read_wraps_single_content() {
        let result = router()
            .handle(&request(
                "resources/read",
                Some(json!({"uri": "forge://context/project"})),
            ))
            .await
            .unwrap();
        assert_eq!(result["contents"].as_array().unwrap().len(), 1);
        assert_eq!(result["contents"][0]["text"], "# Project");
    }

    #[tokio::test]
    async fn read_without_uri_fails() {
        let err = router()
            .handle(&request("resources/read", Some(json!({}))))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required parameter: uri");
    }

    #[tokio::test]
    async fn read_of_foreign_namespace_propagates_store_error() {
        let err = router()
            .handle(&request("resources/read", Some(json!({"uri": "http://x"}))))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Store(StoreError::UnknownNamespace(_))));
    }

    #[tokio::test]
    async fn call_wraps_single_content() {
        let result = router()
            .handle(&request(
                "tools/call",
                Some(json!({"name": "echo", "arguments": {"text": "hello"}})),
            ))
            .await
            .unwrap();
        assert_eq!(result, json!({"content": [{"type": "text", "text": "hello"}]}));
    }

    #[tokio::test]
    async fn call_checks_required_arguments() {
        let err = router()
            .handle(&request("tools/call", Some(json!({"name": "echo"}))))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("text"));
    }

    #[tokio::test]
    async fn call_rejects_unknown_tool_and_non_object_arguments() {
        let router = router();
        let err = router
            .handle(&request("tools/call", Some(json!({"name": "nope"}))))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: nope");

        let err = router
            .handle(&request(
                "tools/call",
                Some(json!({"name": "echo", "arguments": [1]})),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidParams(_)));
    }
}
