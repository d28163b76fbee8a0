// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dynamic route dispatcher.
//!
//! Turns one [`PluginRequest`] into one [`DispatchResponse`]:
//!
//! 1. Route lookup (404, or 503 when an inactive plugin owns the route)
//! 2. Permission check (401 / 403)
//! 3. Fixed-window rate limit (429 with `Retry-After`)
//! 4. Body parse errors from the server (400)
//! 5. Middleware chain, then request validation (400)
//! 6. Handler, inside its own task and under a deadline (500 on panic, 504 on timeout)
//! 7. Response filters and the `request-end` hook
//!
//! Nothing a plugin does can make this function fail or panic; every outcome
//! is an envelope.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Value, json};
use tracing::{Instrument, debug, error, info_span, warn};

use plinth_core::manifest::RequestSchema;
use plinth_core::{
    Actor, HandlerReply, MiddlewareOutcome, PlinthError, PluginRequest, PluginResponse,
    PluginScope, RouteContext, RouteKey,
};
use plinth_hooks::HookName;
use plinth_plugin::{LoadedRoute, PluginRegistry, RouteMatch};

use crate::envelope::Envelope;
use crate::rate_limit::{RateDecision, RateLimiter, WindowKey};

/// Status, JSON body, and extra headers of a dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    pub status: u16,
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

impl DispatchResponse {
    pub fn error(err: &PlinthError) -> Self {
        let mut headers = Vec::new();
        if let PlinthError::RateLimited { retry_after } = err {
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            headers.push(("retry-after".to_string(), secs.max(1).to_string()));
        }
        Self {
            status: err.status_code(),
            body: Envelope::from_error(err).to_value(),
            headers,
        }
    }

    /// Wraps a handler reply.
    ///
    /// A plain value that is already envelope-shaped (an object with a boolean
    /// `success`) passes through with `statusCode` filled in; anything else
    /// becomes `data` of a success envelope.
    pub fn from_reply(reply: HandlerReply) -> Self {
        match reply {
            HandlerReply::Response(response) => Self::from(response),
            HandlerReply::Value(Value::Object(mut map))
                if map.get("success").is_some_and(Value::is_boolean) =>
            {
                let success = map.get("success").and_then(Value::as_bool).unwrap_or(false);
                let status = if success { 200 } else { 400 };
                map.insert("statusCode".to_string(), json!(status));
                Self {
                    status,
                    body: Value::Object(map),
                    headers: Vec::new(),
                }
            }
            HandlerReply::Value(data) => Self {
                status: 200,
                body: Envelope::ok(data, 200).to_value(),
                headers: Vec::new(),
            },
        }
    }
}

impl From<PluginResponse> for DispatchResponse {
    fn from(response: PluginResponse) -> Self {
        Self {
            status: response.status,
            body: response.body,
            headers: response.headers,
        }
    }
}

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.body)).into_response();
        for (name, value) in self.headers {
            match (
                HeaderName::from_str(&name),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().append(name, value);
                }
                _ => debug!(header = %name, "dropping invalid response header"),
            }
        }
        response
    }
}

/// Routes requests under the plugin namespace to live plugin handlers.
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<PluginRegistry>, limiter: Arc<RateLimiter>, timeout: Duration) -> Self {
        Self {
            registry,
            limiter,
            timeout,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn dispatch(&self, request: PluginRequest, actor: Option<Actor>) -> DispatchResponse {
        self.dispatch_with_body_error(request, None, actor).await
    }

    /// Dispatches a request whose body failed to parse.
    ///
    /// Route lookup still runs first, so an unknown route answers 404 rather
    /// than the body error, and the request hooks fire either way.
    pub async fn dispatch_with_body_error(
        &self,
        request: PluginRequest,
        body_error: Option<PlinthError>,
        actor: Option<Actor>,
    ) -> DispatchResponse {
        let started = Instant::now();
        let hooks = self.registry.hooks();
        let method = request.method;
        let path = request.path.clone();

        hooks
            .do_action(
                &HookName::RequestStart,
                &json!({ "method": method, "path": path, "client": request.client }),
            )
            .await;

        let (plugin_id, result) = match self.resolve(&request, actor.as_ref()).await {
            Ok(matched) => {
                let plugin_id = matched.plugin_id().to_string();
                let result = match body_error {
                    Some(e) => Err(e),
                    None => self.invoke(matched, request, actor).await,
                };
                (Some(plugin_id), result)
            }
            Err(e) => (None, Err(e)),
        };

        let mut response = match result {
            Ok(response) => response,
            Err(e) => {
                debug!(%method, %path, error = %e, "plugin request failed");
                DispatchResponse::error(&e)
            }
        };

        if response.status >= 500 {
            hooks
                .do_action(
                    &HookName::Error,
                    &json!({
                        "method": method,
                        "path": path,
                        "pluginId": plugin_id,
                        "status": response.status,
                        "error": response.body.get("error"),
                    }),
                )
                .await;
        }

        let context = json!({
            "method": method,
            "path": path,
            "pluginId": plugin_id,
            "status": response.status,
        });
        response.body = hooks
            .apply_filters(&HookName::ResponseFilter, response.body, &context)
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        hooks
            .do_action(
                &HookName::RequestEnd,
                &json!({
                    "method": method,
                    "path": path,
                    "pluginId": plugin_id,
                    "status": response.status,
                    "durationMs": duration_ms,
                }),
            )
            .await;
        response
    }

    async fn resolve(
        &self,
        request: &PluginRequest,
        actor: Option<&Actor>,
    ) -> Result<RouteMatch, PlinthError> {
        let Some(matched) = self
            .registry
            .get_plugin_by_route(request.method, &request.path)
            .await
        else {
            return match self
                .registry
                .find_inactive_owner(request.method, &request.path)
                .await?
            {
                Some(id) => Err(PlinthError::Unavailable(id)),
                None => Err(PlinthError::NotFound {
                    kind: "route",
                    id: RouteKey::new(request.method, &request.path).to_string(),
                }),
            };
        };

        let decl = &matched.route.decl;
        if !decl.permissions.is_empty() {
            let actor = actor.ok_or(PlinthError::Unauthorized)?;
            if let Some(missing) = actor.missing(&decl.permissions) {
                return Err(PlinthError::Permission(format!(
                    "route {} requires '{missing}'",
                    matched.route.key
                )));
            }
        }

        if let Some(limit) = &decl.rate_limit {
            let key = WindowKey {
                plugin_id: matched.plugin_id().to_string(),
                route: matched.route.key.clone(),
                client: request.client.clone(),
            };
            if let RateDecision::Denied { retry_after } = self.limiter.check(key, limit) {
                return Err(PlinthError::RateLimited { retry_after });
            }
        }
        Ok(matched)
    }

    async fn invoke(
        &self,
        matched: RouteMatch,
        request: PluginRequest,
        actor: Option<Actor>,
    ) -> Result<DispatchResponse, PlinthError> {
        let plugin_id = matched.plugin_id().to_string();
        let store = self.registry.store();
        let config = match store.get_config(&plugin_id).await? {
            Some(config) => config,
            None => matched
                .plugin
                .manifest
                .default_config
                .clone()
                .unwrap_or(Value::Null),
        };

        let span = info_span!("plugin", plugin_id = %plugin_id, route = %matched.route.key);
        let ctx = RouteContext {
            plugin_id: plugin_id.clone(),
            request,
            actor,
            config,
            data: PluginScope::new(plugin_id.clone(), Arc::clone(store)),
            span: span.clone(),
        };
        let route = Arc::clone(&matched.route);
        let task = tokio::spawn(async move { run_route(&route, &ctx).await }.instrument(span));

        // On timeout the task is left to finish on its own.
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) if join.is_panic() => {
                error!(plugin_id = %plugin_id, route = %matched.route.key, "plugin handler panicked");
                Err(PlinthError::Internal(format!(
                    "plugin '{plugin_id}' handler panicked"
                )))
            }
            Ok(Err(join)) => Err(PlinthError::Internal(join.to_string())),
            Err(_) => {
                warn!(plugin_id = %plugin_id, route = %matched.route.key, timeout = ?self.timeout, "plugin handler timed out");
                Err(PlinthError::Timeout {
                    duration: self.timeout,
                })
            }
        }
    }
}

async fn run_route(route: &LoadedRoute, ctx: &RouteContext) -> Result<DispatchResponse, PlinthError> {
    for middleware in &route.middleware {
        if let MiddlewareOutcome::Respond(response) = middleware.process(ctx).await? {
            return Ok(DispatchResponse::from(response));
        }
    }
    if let Some(schema) = &route.decl.validation {
        check_required(schema, &ctx.request)?;
    }
    let reply = route.handler.handle(ctx).await?;
    Ok(DispatchResponse::from_reply(reply))
}

fn check_required(schema: &RequestSchema, request: &PluginRequest) -> Result<(), PlinthError> {
    let mut errors: Vec<String> = schema
        .query
        .iter()
        .filter(|name| request.query_param(name).is_none())
        .map(|name| format!("query parameter '{name}' is required"))
        .collect();
    errors.extend(
        schema
            .body
            .iter()
            .filter(|name| request.body_field(name).is_none())
            .map(|name| format!("body field '{name}' is required")),
    );
    if errors.is_empty() {
        Ok(())
    } else {
        Err(PlinthError::Validation { errors })
    }
}
