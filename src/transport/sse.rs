//! HTTP transport: event stream subscriptions plus synchronous JSON-RPC.
//!
//! Routes: `GET /mcp` (event stream), `POST /mcp` (one request, one
//! response), `GET /health` (diagnostics). Every `OPTIONS` request is
//! answered before routing, and every response carries CORS headers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, DefaultBodyLimit, Request, State},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE,
        },
        HeaderValue, Method, StatusCode,
    },
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, MethodRouter},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
};
use tracing::{debug, info, warn};

use super::subscribers::{SubscriberGuard, SubscriberReceiver, SubscriberSet};
use super::{dispatch, Dispatch};
use crate::config::DEFAULT_MAX_MESSAGE_BYTES;
use crate::error::{McpError, TransportError};
use crate::events::{models::CONNECTED, BroadcastEvent, EventBroadcaster};
use crate::mcp::helpers::failure_envelope;
use crate::mcp::RequestRouter;

/// Event stream and request endpoint.
pub const EVENT_PATH: &str = "/mcp";
/// Diagnostics endpoint.
pub const HEALTH_PATH: &str = "/health";

const ALLOWED_METHODS: &str = "GET, POST";
const ALLOWED_HEADERS: &str = "Content-Type";

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct SseState {
    /// The MCP request dispatcher.
    pub router: RequestRouter,
    /// Connections receiving broadcasts; owned by this listener.
    pub subscribers: Arc<SubscriberSet>,
    /// Event history and fan-out into `subscribers`.
    pub broadcaster: Arc<EventBroadcaster>,
    /// Budget for one POSTed request.
    pub timeout: Duration,
    /// Larger POST bodies are answered with a parse error.
    pub max_body_bytes: usize,
    started_at: Instant,
}

impl SseState {
    /// Creates a fresh subscriber set and a broadcaster that feeds it.
    pub fn new(router: RequestRouter, history_size: usize, timeout: Duration) -> Self {
        let subscribers = Arc::new(SubscriberSet::new());
        let broadcaster =
            Arc::new(EventBroadcaster::new(history_size).with_sink(subscribers.clone()));
        Self {
            router,
            subscribers,
            broadcaster,
            timeout,
            max_body_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            started_at: Instant::now(),
        }
    }
}

/// Builds the axum `Router` with all routes and middleware.
pub fn build_router(state: SseState) -> Router {
    // Middleware: Log requests
    let log_layer = middleware::from_fn(log_requests);

    // Middleware: CORS for a dashboard served from another origin
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);

    // Unrouted methods on known paths are 404 like unknown paths, not 405
    let events = || -> MethodRouter<SseState> {
        get(handle_subscribe)
            .post(handle_request)
            .fallback(handle_not_found)
    };

    Router::new()
        .route(EVENT_PATH, events())
        .route("/mcp/", events()) // Trailing slash safety
        .route(HEALTH_PATH, get(handle_health).fallback(handle_not_found))
        .fallback(handle_not_found)
        .layer(body_limit)
        .layer(middleware::from_fn(answer_options))
        .layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .layer(log_layer)
        .layer(cors_layer)
        .with_state(state)
}

async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    debug!(%method, %uri, "http request");
    let res = next.run(req).await;
    if !res.status().is_success() {
        warn!(%method, %uri, status = %res.status(), "http request failed");
    }
    res
}

/// Pre-flight and any other `OPTIONS` request: 200, empty body, CORS only.
async fn answer_options(req: Request<Body>, next: Next) -> Response {
    if req.method() != Method::OPTIONS {
        return next.run(req).await;
    }
    (
        StatusCode::OK,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
            (ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS),
        ],
    )
        .into_response()
}

/// Endpoint: GET /mcp
/// Registers a subscriber and streams broadcast events until it disconnects.
async fn handle_subscribe(State(state): State<SseState>) -> impl IntoResponse {
    let (id, rx) = state.subscribers.register();
    let guard = SubscriberGuard::new(state.subscribers.clone(), id);
    info!(client = %id, total = state.subscribers.len(), "subscriber connected");

    state.subscribers.send_to(
        &id,
        BroadcastEvent::new(CONNECTED, json!({ "clientId": id.to_string() })),
    );

    Sse::new(event_stream(rx, guard)).keep_alive(KeepAlive::default())
}

/// Adapts a subscriber channel into SSE frames; dropping the stream drops
/// the guard, which deregisters the subscriber.
fn event_stream(
    rx: SubscriberReceiver,
    guard: SubscriberGuard,
) -> impl Stream<Item = Result<Event, axum::Error>> + Send + 'static {
    stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        let frame = Event::default()
            .event(event.event_type.as_str())
            .json_data(&event);
        Some((frame, (rx, guard)))
    })
}

/// Endpoint: POST /mcp
/// One JSON-RPC request in, one JSON-RPC response out, even when the body
/// cannot be read (e.g. over the size limit).
async fn handle_request(
    State(state): State<SseState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let err = McpError::Parse(rejection.body_text());
            warn!(status = %rejection.status(), error = %err, "rejecting unreadable body");
            let envelope = failure_envelope(Value::Null, &err);
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(envelope)).into_response();
        }
    };

    match dispatch(&state.router, &body, state.timeout).await {
        Dispatch::Success(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
        Dispatch::Failure(envelope) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(envelope)).into_response()
        }
        Dispatch::Notification => StatusCode::ACCEPTED.into_response(),
    }
}

/// Endpoint: GET /health
/// Transport-local diagnostics; never touches the router.
async fn handle_health(State(state): State<SseState>) -> impl IntoResponse {
    let rss_bytes = resident_memory_bytes().await;
    Json(json!({
        "status": "ok",
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "subscribers": state.subscribers.len(),
        "memory": { "rssBytes": rss_bytes },
        "events": state.broadcaster.stats(),
    }))
}

async fn handle_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

/// Resident set size from `/proc/self/status`; `None` off Linux.
async fn resident_memory_bytes() -> Option<u64> {
    let status = tokio::fs::read_to_string("/proc/self/status").await.ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// HTTP server that binds the SSE router to a TCP socket.
pub struct SseServer {
    addr: SocketAddr,
    state: SseState,
}

impl SseServer {
    /// Listens on localhost at `port`.
    pub fn new(state: SseState, port: u16) -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            state,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Starts the server and runs until it fails or the future is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP bind fails or the server crashes.
    pub async fn run(self) -> Result<(), TransportError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: self.addr.to_string(),
                source: e,
            })?;

        info!(addr = %self.addr, events = EVENT_PATH, health = HEALTH_PATH, "MCP SSE server ready");

        axum::serve(listener, build_router(self.state))
            .await
            .map_err(TransportError::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::CapabilityRegistry;
    use crate::state::FileStateStore;

    #[tokio::test]
    async fn resident_memory_is_reported_on_linux() {
        if cfg!(target_os = "linux") {
            assert!(resident_memory_bytes().await.unwrap_or(0) > 0);
        }
    }

    #[test]
    fn server_binds_localhost_on_requested_port() {
        let dir = tempfile::tempdir().unwrap();
        let router = RequestRouter::new(
            Arc::new(CapabilityRegistry::default()),
            Arc::new(FileStateStore::new(dir.path())),
        );
        let server = SseServer::new(SseState::new(router, 10, Duration::from_secs(1)), 4010);
        assert_eq!(server.addr().to_string(), "127.0.0.1:4010");
    }
}
