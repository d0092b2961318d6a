//! HTTP server that routes every request through the shell cache policy
//!
//! Provides /_shell-cache/health; every other path is intercepted.

use crate::types::{ErrorResponse, HealthResponse};
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use shell_cache::{is_hop_by_hop, AssetRequest, AssetResponse, Network, Registration, Reply};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Largest request body forwarded to the origin
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// `X-Cache` value for requests the policy did not intercept
const BYPASS: &str = "BYPASS";

/// Shared state for the HTTP server
pub struct ServerState {
    pub registration: Registration,
    /// Used directly for requests the policy passes through
    pub network: Arc<dyn Network>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(registration: Registration, network: Arc<dyn Network>) -> Self {
        Self {
            registration,
            network,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/_shell-cache/health", get(health))
        .fallback(intercept)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;
    let worker = state.registration.active().await;
    let waiting = state.registration.waiting().await;

    let (status, cache) = match state.registration.caches().stats().await {
        Ok(stats) if worker.is_some() => ("ok", stats),
        Ok(stats) => ("degraded", stats),
        Err(e) => {
            warn!(error = %e, "Failed to read cache stats");
            ("degraded", Default::default())
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        uptime_secs,
        worker,
        waiting,
        cache,
    })
}

/// Answer any other request through the active policy
async fn intercept(State(state): State<SharedState>, request: Request) -> Response {
    let request = match to_asset_request(&state, request).await {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.registration.fetch(request.clone()).await {
        Ok(dispatched) => match dispatched.reply {
            Reply::Respond { response, source } => {
                debug!(url = %request.url, source = ?source, "Answered by policy");
                into_http(response, source.as_header_value())
            }
            Reply::PassThrough | Reply::Done => pass_through(&state, &request).await,
        },
        Err(e) => {
            warn!(method = %request.method, url = %request.url, error = %e, "Request failed");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// Forward a request the policy declined to intercept
async fn pass_through(state: &ServerState, request: &AssetRequest) -> Response {
    match state.network.fetch(request).await {
        Ok(response) => into_http(response, BYPASS),
        Err(e) => {
            warn!(method = %request.method, url = %request.url, error = %e, "Pass-through failed");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// Rebuild an incoming request against the application origin
async fn to_asset_request(
    state: &ServerState,
    request: Request,
) -> std::result::Result<AssetRequest, Response> {
    let (parts, body) = request.into_parts();

    // Only the path and query are taken from the request target, so the
    // authority always stays the application origin
    let mut url = state.registration.scope_url().clone();
    url.set_path(parts.uri.path());
    url.set_query(parts.uri.query());
    url.set_fragment(None);
    if url.origin() != state.registration.scope_url().origin() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("Request target leaves the origin: {}", parts.uri),
        ));
    }

    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| error_response(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()))?;

    let mut asset = AssetRequest::new(parts.method.as_str(), url).with_body(body);
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            asset = asset.with_header(name.as_str(), value);
        }
    }
    Ok(asset)
}

/// Convert a policy response into an HTTP response tagged with `X-Cache`
fn into_http(response: AssetResponse, cache_status: &'static str) -> Response {
    let (status, headers, body) = response.into_parts();
    // Opaque responses carry status 0
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut builder = Response::builder().status(status);
    for (name, value) in &headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }

    match builder
        .header("X-Cache", HeaderValue::from_static(cache_status))
        .body(Body::from(body))
    {
        Ok(response) => response,
        Err(e) => error_response(StatusCode::BAD_GATEWAY, format!("Invalid response: {}", e)),
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}
