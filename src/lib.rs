//! FORGE workflow MCP server
//!
//! This library provides an MCP (Model Context Protocol) server that exposes
//! a project's FORGE workflow state (Focus, Orchestrate, Refine, Generate,
//! Evaluate) as resources and tools, over stdio or an SSE HTTP listener.

// Protocol
pub mod error;
pub mod mcp;

// Domain modules
pub mod events;
pub mod state;

// Infrastructure
pub mod config;
pub mod transport;

pub use config::{ServerConfig, TransportMode};
pub use error::{McpError, StoreError, TransportError};
