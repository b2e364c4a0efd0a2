//! Transport bindings
//!
//! Both transports turn one raw message into one outcome through
//! [`dispatch`], so they present the same contract: a success envelope, an
//! error envelope with code `-32603`, or nothing for a client notification.

pub mod sse;
pub mod stdio;
pub mod subscribers;

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::McpError;
use crate::mcp::helpers::{failure_envelope, parse_request, recover_id, rpc_success};
use crate::mcp::RequestRouter;

pub use sse::{build_router, SseServer, SseState};
pub use stdio::{Frame, LineFramer, StdioTransport};
pub use subscribers::SubscriberSet;

/// Result of handling one raw message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// `{ jsonrpc, id, result }`
    Success(Value),
    /// `{ jsonrpc, id, error }`
    Failure(Value),
    /// A client notification; nothing is sent back.
    Notification,
}

/// Parses, routes and wraps one raw message.
///
/// The router call is bounded by `timeout`. Parse failures recover the
/// request id from the raw text when possible. Bytes that are not valid
/// UTF-8 are rejected outright with a `null` id, never repaired.
pub async fn dispatch(router: &RequestRouter, raw: &[u8], timeout: Duration) -> Dispatch {
    let raw = match std::str::from_utf8(raw) {
        Ok(raw) => raw,
        Err(e) => {
            let err = McpError::Parse(format!("message is not valid UTF-8: {e}"));
            warn!(error = %err, "rejecting malformed message");
            return Dispatch::Failure(failure_envelope(Value::Null, &err));
        }
    };

    let request = match parse_request(raw) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "rejecting malformed message");
            return Dispatch::Failure(failure_envelope(recover_id(raw), &err));
        }
    };

    if request.is_notification() {
        debug!(method = %request.method, "received notification");
        return Dispatch::Notification;
    }

    let id = request.response_id();
    let outcome = match tokio::time::timeout(timeout, router.handle(&request)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(McpError::Timeout(timeout)),
    };

    match outcome {
        Ok(result) => Dispatch::Success(rpc_success(id, result)),
        Err(err) => {
            warn!(method = %request.method, error = %err, "request failed");
            Dispatch::Failure(failure_envelope(id, &err))
        }
    }
}

/// Failure for a message over the size limit; its id is never read.
pub fn oversized(limit: usize) -> Dispatch {
    let err = McpError::Parse(format!("message exceeds {limit} bytes"));
    warn!(error = %err, "rejecting oversized message");
    Dispatch::Failure(failure_envelope(Value::Null, &err))
}
