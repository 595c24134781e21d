//! HTTP surface of the relay.
//!
//! Three routes:
//!
//! - `POST /api/chat` forwards a chat request through the [`Relay`].
//! - `GET /api/chat-config` returns the client-safe [`ChatSettings`](crate::types::ChatSettings).
//! - `GET /health` reports liveness.
//!
//! Every response carries CORS headers echoing the caller's origin and a
//! no-store cache policy. `OPTIONS` preflights succeed with an empty body and
//! never touch the governor or the credential.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::rate_limit::RateGovernor;
use crate::relay::{Relay, RelayReply};
use crate::upstream::{RequestOrigin, Upstream};

/// Path of the chat endpoint.
pub const CHAT_PATH: &str = "/api/chat";
/// Path of the config endpoint.
pub const CONFIG_PATH: &str = "/api/chat-config";
/// Path of the health endpoint.
pub const HEALTH_PATH: &str = "/health";

const KEY_MISSING: &str =
    "API key not found. Please configure OPENROUTER_API_KEY environment variable.";
const NO_STORE: &str = "no-cache, no-store, must-revalidate";

/// Shared state behind every route.
pub struct AppState {
    relay: Relay,
    config: Arc<RelayConfig>,
    governor: Arc<RateGovernor>,
    limit_chat: bool,
    started_at: Instant,
}

impl AppState {
    /// Builds the state for one server.
    pub fn new(
        config: Arc<RelayConfig>,
        upstream: Arc<dyn Upstream>,
        governor: Arc<RateGovernor>,
    ) -> Self {
        Self {
            relay: Relay::new(Arc::clone(&config), upstream),
            config,
            governor,
            limit_chat: false,
            started_at: Instant::now(),
        }
    }

    /// Also apply the governor to the chat endpoint.
    pub fn with_chat_limit(mut self, limit_chat: bool) -> Self {
        self.limit_chat = limit_chat;
        self
    }

    async fn check_rate(&self, identity: String) -> Result<()> {
        let governor = Arc::clone(&self.governor);
        tokio::task::spawn_blocking(move || governor.check(&identity))
            .await
            .map_err(|e| Error::io("rate limit check aborted", std::io::Error::other(e)))?
    }
}

/// Builds the router for `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(CHAT_PATH, post(chat).fallback(method_not_allowed))
        .route(CONFIG_PATH, get(chat_config).fallback(method_not_allowed))
        .route(HEALTH_PATH, get(health).fallback(method_not_allowed))
        .layer(cors_layer())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static(NO_STORE),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `state` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: tokio::net::TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, configured = state.config.is_configured(), "chat relay listening");
    }
    let app = router(Arc::new(state));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| Error::io("relay server failed", e))
}

/// The identity the governor counts against.
///
/// The raw `X-Forwarded-For` value when present, else the peer address,
/// else `unknown`.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    peer.map(|p| p.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn request_origin(headers: &HeaderMap) -> RequestOrigin {
    let get = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    RequestOrigin {
        referer: get(header::REFERER),
        host: get(header::HOST),
    }
}

/// Turns an error into the JSON response a caller sees.
pub fn error_response(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(err.response_body())).into_response();
    if let Error::RateLimit {
        retry_after: Some(secs),
        ..
    } = err
        && let Ok(value) = HeaderValue::from_str(&secs.to_string())
    {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

async fn chat(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.limit_chat {
        if let Err(err) = state.config.credentials() {
            return error_response(&err);
        }
        let identity = client_identity(&headers, peer.map(|ConnectInfo(addr)| addr));
        if let Err(err) = state.check_rate(identity).await {
            return error_response(&err);
        }
    }
    match state.relay.handle(&body, &request_origin(&headers)).await {
        Ok(reply) => relay_response(reply),
        Err(err) => {
            if err.http_status() >= 500 {
                tracing::warn!(error = %err, "chat request failed");
            }
            error_response(&err)
        }
    }
}

fn relay_response(reply: RelayReply) -> Response {
    match reply {
        RelayReply::Buffered {
            status,
            content_type,
            body,
        } => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = passthrough_status(status);
            let content_type = content_type.unwrap_or_else(|| "application/json".to_string());
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            response
        }
        RelayReply::Streamed {
            status,
            content_type,
            body,
        } => {
            let mut response = Response::new(Body::from_stream(body));
            *response.status_mut() = passthrough_status(status);
            let headers = response.headers_mut();
            if (200..300).contains(&status) {
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/event-stream"),
                );
                headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
            } else if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(&ct).ok())
            {
                headers.insert(header::CONTENT_TYPE, value);
            }
            response
        }
    }
}

fn passthrough_status(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}

async fn chat_config(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    if state.config.credentials().is_err() {
        tracing::warn!("config requested but relay has no usable API key");
        return error_response(&Error::configuration(KEY_MISSING));
    }
    let identity = client_identity(&headers, peer.map(|ConnectInfo(addr)| addr));
    if let Err(err) = state.check_rate(identity).await {
        return error_response(&err);
    }
    (StatusCode::OK, Json(state.config.settings())).into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime = state.started_at.elapsed().as_millis();
    Json(serde_json::json!({
        "status": "ok",
        "uptime_ms": uptime
    }))
}

async fn method_not_allowed(method: Method) -> Response {
    error_response(&Error::method_not_allowed(method.as_str()))
}

/// Answers every `OPTIONS` request itself and echoes the caller's origin.
///
/// Requests without an `Origin` header get `*` from the outer default.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}
