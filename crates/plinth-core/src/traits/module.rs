// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stable interface implemented by plugin modules.
//!
//! A plugin is a set of modules resolved at runtime: one entry module
//! ([`PluginEntry`]) plus one module per declared route handler
//! ([`RouteHandler`]) and middleware ([`Middleware`]). Hook modules are
//! described by the hook bus crate. Modules are either compiled into the host
//! or loaded from WebAssembly files; both sides see the same traits.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PlinthError;
use crate::route::HttpMethod;
use crate::traits::store::PluginStore;
use crate::types::{Actor, InstalledPluginRecord};

/// Inbound request as seen by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRequest {
    pub method: HttpMethod,
    /// Normalized path relative to the plugin route namespace.
    pub path: String,
    /// Header names are lowercase.
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Value,
    /// Identity used for rate limiting.
    pub client: String,
}

impl PluginRequest {
    pub fn new(method: HttpMethod, path: &str) -> Self {
        Self {
            method,
            path: crate::route::normalize_path(path),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: Value::Null,
            client: "anonymous".to_string(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Top-level body field, `None` when absent, null, or the body is not an object.
    pub fn body_field(&self, name: &str) -> Option<&Value> {
        self.body.get(name).filter(|v| !v.is_null())
    }
}

/// Response a plugin builds explicitly instead of returning a plain value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResponse {
    pub status: u16,
    pub body: Value,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl PluginResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// What a route handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerReply {
    /// A plain value, wrapped into the standard envelope by the dispatcher.
    Value(Value),
    /// A fully formed response, returned as-is.
    Response(PluginResponse),
}

impl From<Value> for HandlerReply {
    fn from(value: Value) -> Self {
        HandlerReply::Value(value)
    }
}

impl From<PluginResponse> for HandlerReply {
    fn from(response: PluginResponse) -> Self {
        HandlerReply::Response(response)
    }
}

/// Persistence accessor limited to the calling plugin's own data.
#[derive(Clone)]
pub struct PluginScope {
    plugin_id: String,
    store: Arc<dyn PluginStore>,
}

impl PluginScope {
    pub fn new(plugin_id: impl Into<String>, store: Arc<dyn PluginStore>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            store,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Current configuration blob, `Value::Null` when none is stored.
    pub async fn config(&self) -> Result<Value, PlinthError> {
        Ok(self
            .store
            .get_config(&self.plugin_id)
            .await?
            .unwrap_or(Value::Null))
    }

    pub async fn set_config(&self, config: &Value) -> Result<(), PlinthError> {
        self.store.set_config(&self.plugin_id, config).await
    }

    pub async fn record(&self) -> Result<Option<InstalledPluginRecord>, PlinthError> {
        self.store.get_record(&self.plugin_id).await
    }
}

impl std::fmt::Debug for PluginScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginScope")
            .field("plugin_id", &self.plugin_id)
            .finish()
    }
}

/// Everything a route handler or middleware receives for one request.
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub plugin_id: String,
    pub request: PluginRequest,
    pub actor: Option<Actor>,
    /// Plugin configuration snapshot taken when the request was dispatched.
    pub config: Value,
    pub data: PluginScope,
    /// Span that attributes log lines to the plugin and route.
    pub span: tracing::Span,
}

impl RouteContext {
    /// Envelope-shaped success value.
    pub fn ok(&self, data: Value) -> HandlerReply {
        HandlerReply::Value(serde_json::json!({ "success": true, "data": data }))
    }

    /// Error response with the given status.
    pub fn fail(&self, status: u16, error: &str) -> HandlerReply {
        HandlerReply::Response(PluginResponse::json(
            status,
            serde_json::json!({ "success": false, "error": error }),
        ))
    }

    /// Serializable view handed to out-of-process modules.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "pluginId": self.plugin_id,
            "request": self.request,
            "actor": self.actor,
            "config": self.config,
        })
    }
}

/// Context handed to entry module lifecycle callbacks.
#[derive(Debug, Clone)]
pub struct EntryContext {
    pub plugin_id: String,
    pub config: Value,
    pub data: PluginScope,
}

/// Plugin entry module.
#[async_trait]
pub trait PluginEntry: Send + Sync {
    /// Called once after the module is imported.
    async fn init(&self, _ctx: &EntryContext) -> Result<(), PlinthError> {
        Ok(())
    }

    /// Called before the plugin's routes and hooks go live.
    async fn activate(&self, _ctx: &EntryContext) -> Result<(), PlinthError> {
        Ok(())
    }

    /// Called after the plugin's routes and hooks are removed.
    async fn deactivate(&self, _ctx: &EntryContext) -> Result<(), PlinthError> {
        Ok(())
    }
}

/// Handler for one declared route.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, ctx: &RouteContext) -> Result<HandlerReply, PlinthError>;
}

/// Result of running one middleware.
#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareOutcome {
    /// Continue with the next middleware or the handler.
    Next,
    /// Short-circuit the request with this response.
    Respond(PluginResponse),
}

/// Route middleware declared by name in the manifest.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn process(&self, ctx: &RouteContext) -> Result<MiddlewareOutcome, PlinthError>;
}
