//! Error types shared by the request router, the transports and the state store.

use std::time::Duration;

use thiserror::Error;

/// Failures raised by the state store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The URI does not belong to a namespace the store serves.
    #[error("Unknown resource namespace: {0}")]
    UnknownNamespace(String),
    /// The URI is in a known namespace but names nothing on disk.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),
    /// No tool with this name is registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    /// Tool arguments could not be decoded.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    /// No active cycle with this identifier.
    #[error("Cycle not found: {0}")]
    CycleNotFound(String),
    /// The cycle is already in its last phase.
    #[error("Cycle {0} is already in the final phase")]
    FinalPhase(String),
    /// A cycle file exists but could not be understood.
    #[error("Malformed cycle file {path}: {reason}")]
    MalformedCycle { path: String, reason: String },
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures surfaced by [`crate::mcp::RequestRouter::handle`] and the transports.
///
/// Every variant is mapped by the transports onto the same JSON-RPC
/// `-32603` envelope; only the message differs.
#[derive(Debug, Error)]
pub enum McpError {
    /// The method is not one of the six supported operations.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
    /// A parameter the method needs is absent.
    #[error("Missing required parameter: {0}")]
    MissingParam(&'static str),
    /// Parameters are present but have the wrong shape.
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    /// The raw message is not valid JSON or not a request object.
    #[error("Parse error: {0}")]
    Parse(String),
    /// The delegate did not answer within the transport's budget.
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// A resource or tool provider failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the transport I/O loops themselves (not per-request failures).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to read from the input stream.
    #[error("read error: {0}")]
    Read(#[source] std::io::Error),
    /// Failed to write to the output stream.
    #[error("write error: {0}")]
    Write(#[source] std::io::Error),
    /// Failed to bind the HTTP listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// The HTTP server stopped with an error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_method_message_names_the_method() {
        let err = McpError::UnknownMethod("prompts/list".into());
        assert_eq!(err.to_string(), "Unknown method: prompts/list");
    }

    #[test]
    fn store_errors_pass_through_unchanged() {
        let err: McpError = StoreError::UnknownTool("nope".into()).into();
        assert_eq!(err.to_string(), "Unknown tool: nope");
    }

    #[test]
    fn timeout_reports_whole_seconds() {
        let err = McpError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Request timed out after 30s");
    }
}
