//! Resolved server configuration.
//!
//! The binary builds a [`ServerConfig`] from command-line flags and
//! environment variables; the library only ever sees this struct.

use std::path::PathBuf;
use std::time::Duration;

/// Default bound on the number of events kept in the broadcaster history.
pub const DEFAULT_HISTORY_SIZE: usize = 100;
/// Default per-request budget applied by the transports.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default size limit for one inbound message (a stdio line or a POST body).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Which transport the process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Line-delimited JSON over stdin/stdout.
    Stdio,
    /// HTTP listener with an event stream on the given port.
    Sse { port: u16 },
}

/// Configuration shared by every component of the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Selected transport.
    pub transport: TransportMode,
    /// Project root; workflow state lives under `<base_dir>/.forge`.
    pub base_dir: PathBuf,
    /// Verbose logging.
    pub debug: bool,
    /// Upper bound on a single `Router.handle` call.
    pub request_timeout: Duration,
    /// Maximum number of retained broadcast events.
    pub history_size: usize,
    /// Larger inbound messages are answered with a parse error.
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::Stdio,
            base_dir: PathBuf::from("."),
            debug: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            history_size: DEFAULT_HISTORY_SIZE,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ServerConfig {
    /// Directory holding all workflow files.
    pub fn forge_dir(&self) -> PathBuf {
        self.base_dir.join(".forge")
    }
}
