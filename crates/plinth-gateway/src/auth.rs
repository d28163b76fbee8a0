// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Actor resolution for the gateway.
//!
//! Plinth does not issue sessions. Trusted bearer tokens from `[auth]` map
//! onto actors; a request without a known token is anonymous. Plugin routes
//! decide for themselves whether an actor is required; the admin API always
//! requires one.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use plinth_config::model::AuthConfig;
use plinth_core::{Actor, PlinthError};

use crate::admin::ApiError;
use crate::server::GatewayState;

/// Permission that grants access to the admin API without the admin role.
pub const ADMIN_PERMISSION: &str = "admin:access";

/// Maps bearer tokens onto actors.
#[derive(Clone, Default)]
pub struct ActorResolver {
    tokens: Arc<HashMap<String, Actor>>,
}

impl ActorResolver {
    pub fn new(config: &AuthConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .map(|t| {
                let actor = Actor {
                    id: t.actor_id.clone(),
                    roles: t.roles.clone(),
                    permissions: t.permissions.clone(),
                };
                (t.token.clone(), actor)
            })
            .collect();
        Self {
            tokens: Arc::new(tokens),
        }
    }

    pub fn resolve_token(&self, token: &str) -> Option<Actor> {
        self.tokens.get(token).cloned()
    }

    /// Actor for the request's `Authorization: Bearer` header, if any.
    pub fn resolve(&self, headers: &HeaderMap) -> Option<Actor> {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))?;
        let actor = self.resolve_token(token.trim());
        if actor.is_none() {
            tracing::debug!("unknown bearer token, treating request as anonymous");
        }
        actor
    }
}

impl std::fmt::Debug for ActorResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorResolver")
            .field("tokens", &format!("[{} redacted]", self.tokens.len()))
            .finish()
    }
}

/// Middleware guarding the admin API.
///
/// Rejects anonymous requests with 401 and actors lacking the admin role or
/// `admin:access` with 403. On success the [`Actor`] is stored as a request
/// extension.
pub async fn require_admin(
    State(state): State<GatewayState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(actor) = state.actors.resolve(request.headers()) else {
        return ApiError::from(PlinthError::Unauthorized).into_response();
    };
    if let Some(missing) = actor.missing(&[ADMIN_PERMISSION.to_string()]) {
        tracing::warn!(actor = %actor.id, "admin request rejected");
        return ApiError::from(PlinthError::Permission(format!(
            "actor '{}' lacks '{missing}'",
            actor.id
        )))
        .into_response();
    }
    request.extensions_mut().insert(actor);
    next.run(request).await
}
