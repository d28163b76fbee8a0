// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up the plugin route namespace, the admin API, the health endpoint,
//! and shared state.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    extract::{ConnectInfo, DefaultBodyLimit, Query, Request, State},
    http::{HeaderMap, request::Parts},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use plinth_core::{Actor, HttpMethod, PlinthError, PluginRequest};
use plinth_plugin::PluginHost;

use crate::admin;
use crate::auth::{ActorResolver, require_admin};
use crate::dispatcher::{DispatchResponse, Dispatcher};
use crate::rate_limit::RateLimiter;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub host: Arc<PluginHost>,
    pub dispatcher: Arc<Dispatcher>,
    pub actors: ActorResolver,
    /// Reserved prefix stripped before route lookup.
    pub route_prefix: Arc<str>,
    pub max_body_bytes: usize,
    /// Process start time for uptime calculation.
    pub started_at: Instant,
}

impl GatewayState {
    /// Builds the state from the host's configuration.
    pub fn new(host: Arc<PluginHost>) -> Self {
        let config = Arc::clone(host.config());
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.max_tracked_clients));
        let dispatcher = Dispatcher::new(
            Arc::clone(host.registry()),
            limiter,
            Duration::from_secs(config.server.request_timeout_secs),
        );
        Self::with_dispatcher(host, dispatcher)
    }

    /// Builds the state around an already configured dispatcher.
    pub fn with_dispatcher(host: Arc<PluginHost>, dispatcher: Dispatcher) -> Self {
        let config = Arc::clone(host.config());
        Self {
            actors: ActorResolver::new(&config.auth),
            route_prefix: Arc::from(config.server.route_prefix.as_str()),
            max_body_bytes: config.server.max_body_bytes,
            dispatcher: Arc::new(dispatcher),
            started_at: Instant::now(),
            host,
        }
    }
}

/// Builds the gateway router.
///
/// - `GET /health` (no auth)
/// - `{admin_prefix}/…` admin API (admin actor required)
/// - `{route_prefix}/…` any method, dispatched to plugins
pub fn router(state: GatewayState) -> Router {
    let config = Arc::clone(state.host.config());
    let prefix = config.server.route_prefix.as_str();

    let admin_routes = admin::routes()
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ))
        .layer(DefaultBodyLimit::max(state.max_body_bytes));

    Router::new()
        .route("/health", get(health))
        .nest(&config.server.admin_prefix, admin_routes)
        .route(prefix, any(dispatch_plugin_route))
        .route(&format!("{prefix}/{{*path}}"), any(dispatch_plugin_route))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<GatewayState>) -> Json<Value> {
    let registry = state.host.registry();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "activePlugins": registry.get_active_plugins().await.len(),
        "routes": registry.route_count().await,
    }))
}

async fn dispatch_plugin_route(State(state): State<GatewayState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return DispatchResponse::error(&PlinthError::validation(format!(
                "request body exceeds {} bytes",
                state.max_body_bytes
            )))
            .into_response();
        }
    };

    let actor = state.actors.resolve(&parts.headers);
    let mut request = match plugin_request(&state, &parts, actor.as_ref()) {
        Ok(request) => request,
        Err(e) => return DispatchResponse::error(&e).into_response(),
    };
    let body_error = match parse_body(&bytes) {
        Ok(body) => {
            request.body = body;
            None
        }
        Err(e) => Some(e),
    };
    state
        .dispatcher
        .dispatch_with_body_error(request, body_error, actor)
        .await
        .into_response()
}

/// Converts the HTTP request into the plugin-facing request.
fn plugin_request(
    state: &GatewayState,
    parts: &Parts,
    actor: Option<&Actor>,
) -> Result<PluginRequest, PlinthError> {
    let full_path = parts.uri.path();
    let relative = full_path
        .strip_prefix(state.route_prefix.as_ref())
        .unwrap_or(full_path);
    let method = HttpMethod::from_str(parts.method.as_str()).map_err(|_| PlinthError::NotFound {
        kind: "route",
        id: format!("{} {relative}", parts.method),
    })?;

    let mut request = PluginRequest::new(method, relative);
    request.query = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(query)| query)
        .unwrap_or_default();
    request.headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    request.client = client_identity(actor, &parts.headers, parts.extensions.get());
    Ok(request)
}

/// An empty or blank body is `null`; anything else must be JSON.
fn parse_body(body: &[u8]) -> Result<Value, PlinthError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| PlinthError::validation(format!("request body is not valid JSON: {e}")))
}

/// Actor id, else first `X-Forwarded-For` address, else peer address.
fn client_identity(
    actor: Option<&Actor>,
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
) -> String {
    if let Some(actor) = actor {
        return actor.id.clone();
    }
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(addr) = forwarded {
        return addr.to_string();
    }
    match peer {
        Some(ConnectInfo(addr)) => addr.ip().to_string(),
        None => "anonymous".to_string(),
    }
}

/// Serves the gateway until `shutdown` is cancelled.
pub async fn start_server(state: GatewayState, shutdown: CancellationToken) -> Result<(), PlinthError> {
    let config = Arc::clone(state.host.config());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PlinthError::Internal(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!(
        %addr,
        route_prefix = %config.server.route_prefix,
        admin_prefix = %config.server.admin_prefix,
        "gateway listening"
    );

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|e| PlinthError::Internal(format!("gateway server error: {e}")))?;

    tracing::info!("gateway stopped");
    Ok(())
}
