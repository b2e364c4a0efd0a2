//! Model Context Protocol (MCP) Module
//!
//! This module contains the protocol layer shared by both transports:
//! - Protocol models (JsonRpcRequest, McpMethod, constants)
//! - Envelope helpers (success/error responses, id recovery)
//! - Capability registry advertised on `initialize`
//! - The request router dispatching the six supported methods

pub mod capabilities;
pub mod handlers;
pub mod helpers;
pub mod models;

// Re-export commonly used types and functions
pub use capabilities::CapabilityRegistry;
pub use handlers::RequestRouter;
pub use models::{JsonRpcRequest, McpMethod};
