// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Native plugin modules with predictable behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use plinth_core::{
    EntryContext, HandlerReply, Middleware, MiddlewareOutcome, PlinthError, PluginEntry,
    PluginResponse, RouteContext, RouteHandler,
};
use serde_json::json;

/// Replies `{success: true, message}`.
pub struct Greeting(pub String);

impl Greeting {
    pub fn new(message: &str) -> Self {
        Self(message.to_string())
    }
}

#[async_trait]
impl RouteHandler for Greeting {
    async fn handle(&self, _ctx: &RouteContext) -> Result<HandlerReply, PlinthError> {
        Ok(json!({ "success": true, "message": self.0 }).into())
    }
}

/// Replies with what the handler saw.
pub struct EchoRoute;

#[async_trait]
impl RouteHandler for EchoRoute {
    async fn handle(&self, ctx: &RouteContext) -> Result<HandlerReply, PlinthError> {
        Ok(json!({
            "plugin": ctx.plugin_id,
            "path": ctx.request.path,
            "query": ctx.request.query,
            "body": ctx.request.body,
            "client": ctx.request.client,
            "actor": ctx.actor.as_ref().map(|a| a.id.clone()),
            "config": ctx.config,
        })
        .into())
    }
}

/// Always returns an error.
pub struct FailingRoute;

#[async_trait]
impl RouteHandler for FailingRoute {
    async fn handle(&self, _ctx: &RouteContext) -> Result<HandlerReply, PlinthError> {
        Err(PlinthError::Internal("handler failed".to_string()))
    }
}

/// Always panics.
pub struct PanickingRoute;

#[async_trait]
impl RouteHandler for PanickingRoute {
    async fn handle(&self, _ctx: &RouteContext) -> Result<HandlerReply, PlinthError> {
        panic!("handler panicked");
    }
}

/// Sleeps before replying.
pub struct SlowRoute(pub Duration);

#[async_trait]
impl RouteHandler for SlowRoute {
    async fn handle(&self, _ctx: &RouteContext) -> Result<HandlerReply, PlinthError> {
        tokio::time::sleep(self.0).await;
        Ok(json!({ "slept_ms": self.0.as_millis() as u64 }).into())
    }
}

/// Entry module that counts its lifecycle callbacks.
#[derive(Default)]
pub struct CountingEntry {
    activations: AtomicUsize,
    deactivations: AtomicUsize,
}

impl CountingEntry {
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginEntry for CountingEntry {
    async fn activate(&self, _ctx: &EntryContext) -> Result<(), PlinthError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn deactivate(&self, _ctx: &EntryContext) -> Result<(), PlinthError> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Entry module whose activation always fails.
pub struct FailingEntry;

#[async_trait]
impl PluginEntry for FailingEntry {
    async fn activate(&self, ctx: &EntryContext) -> Result<(), PlinthError> {
        Err(PlinthError::Lifecycle {
            plugin_id: ctx.plugin_id.clone(),
            message: "refusing to activate".to_string(),
        })
    }
}

/// Middleware that short-circuits with a fixed status.
pub struct BlockingMiddleware(pub u16);

#[async_trait]
impl Middleware for BlockingMiddleware {
    async fn process(&self, _ctx: &RouteContext) -> Result<MiddlewareOutcome, PlinthError> {
        Ok(MiddlewareOutcome::Respond(PluginResponse::json(
            self.0,
            json!({ "success": false, "error": "blocked by middleware" }),
        )))
    }
}

/// Middleware that lets every request through.
pub struct PassMiddleware;

#[async_trait]
impl Middleware for PassMiddleware {
    async fn process(&self, _ctx: &RouteContext) -> Result<MiddlewareOutcome, PlinthError> {
        Ok(MiddlewareOutcome::Next)
    }
}
