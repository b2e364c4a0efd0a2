//! `forge-mcp` binary: parses flags, prepares workflow state and serves the
//! selected transport until input ends or a shutdown signal arrives.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use forge_mcp::config::{DEFAULT_HISTORY_SIZE, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_REQUEST_TIMEOUT};
use forge_mcp::events::EventBroadcaster;
use forge_mcp::mcp::{CapabilityRegistry, RequestRouter};
use forge_mcp::state::{FileStateStore, StateStore};
use forge_mcp::transport::{SseServer, SseState, StdioTransport};
use forge_mcp::{ServerConfig, TransportMode};

/// MCP server for the FORGE development workflow.
#[derive(Debug, Parser)]
#[command(name = "forge-mcp", version, about)]
struct Cli {
    /// Serve over stdin/stdout (default).
    #[arg(long, conflicts_with = "sse")]
    stdio: bool,

    /// Serve an HTTP event stream on this port instead of stdio.
    #[arg(long, value_name = "PORT", env = "FORGE_SSE_PORT")]
    sse: Option<u16>,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,

    /// Project root containing the `.forge` directory.
    #[arg(long, env = "FORGE_BASE_DIR", default_value = ".")]
    base_dir: PathBuf,

    /// Seconds a single request may take before it fails.
    #[arg(long, env = "FORGE_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Number of broadcast events kept in memory.
    #[arg(long, env = "FORGE_HISTORY_SIZE", default_value_t = DEFAULT_HISTORY_SIZE)]
    history_size: usize,

    /// Largest accepted message in bytes (stdio line or POST body).
    #[arg(long, env = "FORGE_MAX_MESSAGE_BYTES", default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    max_message_bytes: usize,

    /// Log output format: plain (default) or json.
    #[arg(long, default_value = "plain", value_parser = ["plain", "json"])]
    log_format: String,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let transport = match (self.stdio, self.sse) {
            (false, Some(port)) => TransportMode::Sse { port },
            _ => TransportMode::Stdio,
        };
        ServerConfig {
            transport,
            base_dir: self.base_dir,
            debug: self.debug,
            request_timeout: Duration::from_secs(self.timeout_secs),
            history_size: self.history_size,
            max_message_bytes: self.max_message_bytes,
        }
    }
}

fn init_tracing(debug: bool, format: &str) {
    // stdout belongs to the stdio transport, so logs always go to stderr.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        "json" => builder.json().with_target(true).init(),
        _ => builder.init(),
    }
}

/// A panic anywhere means state can no longer be trusted: log and exit 1.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic| {
        error!(%panic, "uncaught panic, terminating");
        std::process::exit(1);
    }));
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let store = Arc::new(FileStateStore::new(&config.base_dir));
    store.init().await.with_context(|| {
        format!(
            "failed to prepare workflow directory {}",
            config.forge_dir().display()
        )
    })?;

    let router = RequestRouter::new(Arc::new(CapabilityRegistry::default()), store.clone());

    match config.transport {
        TransportMode::Stdio => {
            let broadcaster = Arc::new(EventBroadcaster::new(config.history_size));
            tokio::spawn(broadcaster.run(store.subscribe()));

            let mut transport = StdioTransport::new(
                tokio::io::stdin(),
                tokio::io::stdout(),
                router,
                config.request_timeout,
            )
            .with_max_message_bytes(config.max_message_bytes);
            tokio::select! {
                result = transport.run() => result.context("stdio transport failed")?,
                _ = shutdown_signal() => info!("shutdown signal received"),
            }
        }
        TransportMode::Sse { port } => {
            let mut state = SseState::new(router, config.history_size, config.request_timeout);
            state.max_body_bytes = config.max_message_bytes;
            tokio::spawn(state.broadcaster.clone().run(store.subscribe()));

            let server = SseServer::new(state, port);
            tokio::select! {
                result = server.run() => result.context("SSE transport failed")?,
                _ = shutdown_signal() => info!("shutdown signal received"),
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug, &cli.log_format);
    install_panic_hook();

    let config = cli.into_config();
    info!(
        transport = ?config.transport,
        base_dir = %config.base_dir.display(),
        "forge-mcp starting"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(config));
    // A blocked stdin read must not hold the process open after shutdown.
    runtime.shutdown_timeout(Duration::from_secs(1));

    match result {
        Ok(()) => {
            info!("forge-mcp stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "forge-mcp failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_stdio() {
        let cli = Cli::parse_from(["forge-mcp"]);
        assert_eq!(cli.into_config().transport, TransportMode::Stdio);
    }

    #[test]
    fn sse_flag_selects_port() {
        let cli = Cli::parse_from(["forge-mcp", "--sse", "4000", "--base-dir", "/tmp/p"]);
        let config = cli.into_config();
        assert_eq!(config.transport, TransportMode::Sse { port: 4000 });
        assert_eq!(config.forge_dir(), PathBuf::from("/tmp/p/.forge"));
        assert_eq!(config.max_message_bytes, DEFAULT_MAX_MESSAGE_BYTES);
    }

    #[test]
    fn stdio_and_sse_conflict() {
        assert!(Cli::try_parse_from(["forge-mcp", "--stdio", "--sse", "4000"]).is_err());
    }
}
