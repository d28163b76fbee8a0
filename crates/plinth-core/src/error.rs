// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Plinth plugin runtime.

use std::time::Duration;

use thiserror::Error;

/// The primary error type shared by every Plinth component.
///
/// Expected failures (bad manifests, conflicts, missing plugins) are returned
/// as values of this type. Each variant maps onto a single HTTP status code
/// through [`PlinthError::status_code`].
#[derive(Debug, Error)]
pub enum PlinthError {
    /// Manifest, package, configuration payload, or request validation failed.
    #[error("validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    /// Duplicate plugin id without overwrite, uninstall while active, or a
    /// route collision between two active plugins.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested plugin, record, or route does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An operation requires an authenticated actor and none was supplied.
    #[error("authentication required")]
    Unauthorized,

    /// The actor lacks a required role or permission.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The route belongs to an installed plugin that is not active.
    #[error("plugin '{0}' is installed but not active")]
    Unavailable(String),

    /// A rate-limit window is exhausted.
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// A plugin manifest or module could not be loaded.
    #[error("failed to load plugin '{plugin_id}': {message}")]
    Load { plugin_id: String, message: String },

    /// A lifecycle transition is not valid from the plugin's current state.
    #[error("invalid lifecycle transition for '{plugin_id}': {message}")]
    Lifecycle { plugin_id: String, message: String },

    /// Persistence backend errors.
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Filesystem errors while reading archives or moving plugin files.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A plugin handler or module call exceeded its deadline.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors, including plugin panics.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PlinthError {
    /// Shorthand for a single-message validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        PlinthError::Validation {
            errors: vec![message.into()],
        }
    }

    /// Shorthand for a missing plugin.
    pub fn plugin_not_found(id: impl Into<String>) -> Self {
        PlinthError::NotFound {
            kind: "plugin",
            id: id.into(),
        }
    }

    /// Shorthand for a load failure.
    pub fn load(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        PlinthError::Load {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }

    /// Wraps any storage backend error.
    pub fn storage(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        PlinthError::Storage {
            source: source.into(),
        }
    }

    /// HTTP status code used when this error crosses the HTTP boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            PlinthError::Validation { .. } => 400,
            PlinthError::Unauthorized => 401,
            PlinthError::Permission(_) => 403,
            PlinthError::NotFound { .. } => 404,
            PlinthError::Conflict(_) => 409,
            PlinthError::Unavailable(_) => 503,
            PlinthError::RateLimited { .. } => 429,
            PlinthError::Timeout { .. } => 504,
            PlinthError::Load { .. }
            | PlinthError::Lifecycle { .. }
            | PlinthError::Storage { .. }
            | PlinthError::Io(_)
            | PlinthError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable category name.
    pub fn kind(&self) -> &'static str {
        match self {
            PlinthError::Validation { .. } => "ValidationError",
            PlinthError::Conflict(_) => "ConflictError",
            PlinthError::NotFound { .. } => "NotFoundError",
            PlinthError::Unauthorized => "UnauthorizedError",
            PlinthError::Permission(_) => "PermissionError",
            PlinthError::Unavailable(_) => "UnavailableError",
            PlinthError::RateLimited { .. } => "RateLimitError",
            PlinthError::Load { .. } => "LoadError",
            PlinthError::Lifecycle { .. } => "LifecycleError",
            PlinthError::Timeout { .. } => "TimeoutError",
            PlinthError::Storage { .. } | PlinthError::Io(_) | PlinthError::Internal(_) => {
                "InternalError"
            }
        }
    }
}
