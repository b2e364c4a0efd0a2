//! MCP Protocol Helpers
//!
//! This module contains helper functions for JSON-RPC envelope construction
//! shared by the stdio and SSE transports.

use serde_json::{json, Value};

use super::models::{JsonRpcRequest, INTERNAL_ERROR, JSONRPC_VERSION};
use crate::error::McpError;

/// Builds a JSON-RPC 2.0 success response.
///
/// # Arguments
///
/// * `id` – The request identifier that must be echoed back.
/// * `result` – The payload representing the successful outcome.
///
/// # Returns
///
/// A `serde_json::Value` shaped as a JSON-RPC success envelope.
pub fn rpc_success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

/// Builds a JSON-RPC 2.0 error response.
///
/// # Arguments
///
/// * `id` – The request identifier (or `null` if unavailable).
/// * `code` – The JSON-RPC error code.
/// * `message` – Human-readable description of the error.
///
/// # Returns
///
/// A `serde_json::Value` shaped as a JSON-RPC error envelope.
pub fn rpc_error(id: Value, code: i32, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code,
            "message": message.into(),
        }
    })
}

/// Maps any router or transport failure onto the internal-error envelope.
pub fn failure_envelope(id: Value, err: &McpError) -> Value {
    rpc_error(id, INTERNAL_ERROR, err.to_string())
}

/// Best-effort extraction of `id` from raw text whose handling failed.
///
/// Falls back to `null` when the text is not a JSON object or has no `id`.
pub fn recover_id(raw: &str) -> Value {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get("id").cloned())
        .unwrap_or(Value::Null)
}

/// Decodes one raw message into a request.
pub fn parse_request(raw: &str) -> Result<JsonRpcRequest, McpError> {
    serde_json::from_str(raw).map_err(|e| McpError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_error_are_exclusive() {
        let ok = rpc_success(json!(1), json!({"pong": true}));
        assert!(ok.get("error").is_none());
        assert_eq!(ok["result"]["pong"], true);

        let err = rpc_error(json!("a"), INTERNAL_ERROR, "boom");
        assert!(err.get("result").is_none());
        assert_eq!(err["error"]["code"], -32603);
        assert_eq!(err["id"], "a");
    }

    #[test]
    fn recovers_id_from_request_with_bad_method_type() {
        assert_eq!(recover_id(r#"{"id": 9, "method": 42}"#), json!(9));
        assert_eq!(recover_id(r#"{"id": "x"}"#), json!("x"));
    }

    #[test]
    fn unrecoverable_id_is_null() {
        assert_eq!(recover_id("{not json"), Value::Null);
        assert_eq!(recover_id("[1,2]"), Value::Null);
        assert_eq!(recover_id(r#"{"method":"ping"}"#), Value::Null);
    }

    #[test]
    fn parse_request_rejects_non_string_method() {
        let err = parse_request(r#"{"method": 123, "id": 1}"#).unwrap_err();
        assert!(matches!(err, McpError::Parse(_)));
    }
}
