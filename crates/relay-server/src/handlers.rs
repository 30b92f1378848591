//! HTTP handlers for the Relay server.
//!
//! A single Engine.IO endpoint serves the handshake (GET without `sid`),
//! long-polls (GET with `sid`) and inbound packets (POST with `sid`).

use crate::config::Config;
use crate::metrics;
use crate::socket::SocketHandler;
use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use relay_protocol::{
    EnginePacket, Handshake, PacketCodec, PayloadProcessor, ProtocolError, Revision,
    DEFAULT_NAMESPACE,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tenvis_relay_core::{
    CleanupController, Connection, ConnectionLifecycle, DeliveryQueue, HeartbeatController,
    LifecycleError, MessageBroadcaster, RoomManager, SharedClock, SharedDispatcher, SharedStore,
    StatusError, StoreError, TransportKind,
};
use tenvis_relay_transport::{Transport, TransportContext, TransportError, TransportRegistry};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BINARY_CONTENT_TYPE: &str = "application/octet-stream";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";
const JSONP_CONTENT_TYPE: &str = "text/javascript; charset=UTF-8";

/// Shared server state.
#[derive(Debug)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    pub store: SharedStore,
    pub clock: SharedClock,
    pub lifecycle: ConnectionLifecycle,
    pub queue: Arc<DeliveryQueue>,
    pub broadcaster: MessageBroadcaster,
    pub registry: TransportRegistry,
    transports: HashMap<TransportKind, Arc<dyn Transport>>,
    codec: PacketCodec,
}

impl AppState {
    /// Wire the engine together.
    #[must_use]
    pub fn new(
        config: Config,
        store: SharedStore,
        clock: SharedClock,
        dispatcher: SharedDispatcher,
    ) -> Self {
        let lifecycle = ConnectionLifecycle::new(
            store.clone(),
            RoomManager::new(store.clone()),
            dispatcher.clone(),
            clock.clone(),
        );
        let queue = Arc::new(DeliveryQueue::new(
            store.clone(),
            clock.clone(),
            config.queue.queue(),
        ));
        let broadcaster = MessageBroadcaster::new(store.clone(), dispatcher.clone(), clock.clone());
        let handler = SocketHandler::new(
            store.clone(),
            lifecycle.clone(),
            queue.clone(),
            broadcaster.clone(),
            dispatcher,
        );

        let registry = TransportRegistry::with_defaults();
        let transports = registry.create_all(&TransportContext {
            store: store.clone(),
            queue: queue.clone(),
            lifecycle: lifecycle.clone(),
            handler: Arc::new(handler),
            clock: clock.clone(),
            config: config.engine.polling(),
        });

        Self {
            config,
            store,
            clock,
            lifecycle,
            queue,
            broadcaster,
            registry,
            transports,
            codec: PacketCodec::new(),
        }
    }

    /// The heartbeat controller for this engine.
    #[must_use]
    pub fn heartbeat(&self) -> HeartbeatController {
        HeartbeatController::new(
            self.store.clone(),
            self.lifecycle.clone(),
            self.queue.clone(),
            self.broadcaster.clone(),
            self.clock.clone(),
            self.config
                .heartbeat
                .controller(self.config.engine.ping_timeout()),
        )
    }

    /// The cleanup controller for this engine.
    #[must_use]
    pub fn cleanup(&self) -> CleanupController {
        CleanupController::new(
            self.store.clone(),
            self.queue.clone(),
            self.config.cleanup.controller(),
        )
    }

    fn transport(&self, kind: TransportKind) -> Result<Arc<dyn Transport>, TransportError> {
        self.transports
            .get(&kind)
            .cloned()
            .ok_or_else(|| TransportError::Unsupported(kind.to_string()))
    }

    /// Load a live connection and check it, disconnecting on a liveness
    /// fault.
    async fn connection(&self, session_id: &str) -> Result<Connection, ApiError> {
        let mut connection = match self.lifecycle.find(session_id).await? {
            Some(connection) if connection.connected => connection,
            _ => return Err(TransportError::UnknownSession(session_id.to_string()).into()),
        };

        if let Err(fault) = self
            .lifecycle
            .check_active(&connection, self.config.engine.ping_timeout())
        {
            warn!(session = %session_id, error = %fault, "Connection failed liveness check");
            self.lifecycle.disconnect(&mut connection).await?;
            metrics::record_disconnect(fault.kind());
            return Err(fault.into());
        }
        Ok(connection)
    }
}

/// Engine.IO query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct EngineQuery {
    /// Session id; absent on the handshake.
    pub sid: Option<String>,
    /// JSONP callback index.
    pub j: Option<u32>,
    /// Requested transport.
    pub transport: Option<String>,
    /// Engine.IO protocol revision.
    #[serde(rename = "EIO")]
    pub eio: Option<u8>,
}

/// Request errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing session id")]
    MissingSession,

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingSession | Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::Status(fault) => StatusCode::from_u16(fault.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Transport(err) => match err {
                TransportError::UnknownSession(_)
                | TransportError::Unsupported(_)
                | TransportError::Protocol(_) => StatusCode::BAD_REQUEST,
                TransportError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Lifecycle(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::MissingSession => "missing_session",
            Self::Status(_) => "liveness",
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Lifecycle(_) | Self::Store(_) => "store",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        metrics::record_error(self.kind());
        debug!(status = %status, error = %self, "Request failed");
        (status, self.to_string()).into_response()
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let path = state.config.engine.path.clone();
    let limit = state.config.engine.max_http_buffer_size;

    let mut app = Router::new()
        .route(&path, get(engine_get).post(engine_post))
        .route("/health", get(health_handler));

    let trimmed = path.trim_end_matches('/');
    if !trimmed.is_empty() && trimmed != path {
        app = app.route(trimmed, get(engine_get).post(engine_post));
    }

    app.layer(DefaultBodyLimit::max(limit)).with_state(state)
}

/// Run the HTTP server until `token` is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<AppState>, token: CancellationToken) -> Result<()> {
    let addr = state.config.bind_addr()?;
    let path = state.config.engine.path.clone();
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    info!("Engine.IO endpoint: http://{}{}", addr, path);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let transports: Vec<&str> = state.transports.keys().map(TransportKind::as_str).collect();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "transports": transports,
    }))
}

/// Pick the payload framing for a request.
fn framing(query: &EngineQuery, headers: &HeaderMap) -> PayloadProcessor {
    if let Some(index) = query.j {
        return PayloadProcessor::jsonp(index);
    }
    let binary = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains(BINARY_CONTENT_TYPE));
    if binary {
        PayloadProcessor::binary()
    } else {
        PayloadProcessor::new()
    }
}

fn payload_response(payload: &PayloadProcessor, body: Bytes) -> Response {
    let content_type = if payload.jsonp_index().is_some() {
        JSONP_CONTENT_TYPE
    } else if payload.supports_binary() {
        BINARY_CONTENT_TYPE
    } else {
        TEXT_CONTENT_TYPE
    };
    metrics::record_bytes(body.len(), "out");
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static(content_type))],
        body,
    )
        .into_response()
}

/// GET: handshake or long-poll.
async fn engine_get(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EngineQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    Revision::negotiate(query.eio)?;
    let payload = framing(&query, &headers);

    match query.sid.as_deref() {
        None => handshake(&state, &query, &payload).await,
        Some(session_id) => poll(&state, session_id, &payload).await,
    }
}

async fn handshake(
    state: &AppState,
    query: &EngineQuery,
    payload: &PayloadProcessor,
) -> Result<Response, ApiError> {
    let kind = state.registry.negotiate(query.transport.as_deref())?;
    let transport = state.transport(kind)?;

    let engine = &state.config.engine;
    let connection = state
        .lifecycle
        .open(kind, DEFAULT_NAMESPACE, engine.session_ttl())
        .await?;

    let handshake = Handshake {
        sid: connection.session_id,
        upgrades: transport.upgrades(),
        ping_interval: engine.ping_interval_ms,
        ping_timeout: engine.ping_timeout_ms,
        max_payload: engine.max_payload_size as u64,
    };
    let open = state.codec.encode(&state.codec.create_open(&handshake));
    metrics::record_handshake();

    Ok(payload_response(payload, payload.encode_payload(&[open])))
}

async fn poll(
    state: &AppState,
    session_id: &str,
    payload: &PayloadProcessor,
) -> Result<Response, ApiError> {
    let connection = state.connection(session_id).await?;
    let kind = connection
        .transport
        .map(|binding| binding.kind)
        .ok_or(StatusError::InvalidTransport)?;
    let transport = state.transport(kind)?;

    let started = Instant::now();
    let body = match transport.poll(&connection, payload).await {
        Ok(body) => body,
        Err(TransportError::ConnectionClosed) => {
            let close = state.codec.encode(&EnginePacket::close());
            payload.encode_payload(&[close])
        }
        Err(err) => return Err(err.into()),
    };
    metrics::record_poll(started.elapsed().as_secs_f64());

    Ok(payload_response(payload, body))
}

/// POST: inbound packets.
async fn engine_post(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EngineQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    Revision::negotiate(query.eio)?;
    let payload = framing(&query, &headers);
    let session_id = query.sid.as_deref().ok_or(ApiError::MissingSession)?;

    let mut connection = state.connection(session_id).await?;
    let kind = connection
        .transport
        .map(|binding| binding.kind)
        .ok_or(StatusError::InvalidTransport)?;
    let transport = state.transport(kind)?;

    metrics::record_bytes(body.len(), "in");
    let count = transport.receive(&mut connection, &body, &payload).await?;
    metrics::record_packets_received(count);

    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE))],
        "ok",
    )
        .into_response())
}
