// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Plinth plugin runtime.
//!
//! This crate provides the error taxonomy, the manifest and record types,
//! and the trait seams shared by every other Plinth crate: the persistence
//! contract and the interface plugin modules implement.

pub mod error;
pub mod manifest;
pub mod route;
pub mod traits;
pub mod types;

pub use error::PlinthError;
pub use manifest::{PluginManifest, RouteDecl};
pub use route::{HttpMethod, RouteKey, normalize_path};
pub use traits::{
    EntryContext, HandlerReply, Middleware, MiddlewareOutcome, PluginEntry, PluginRequest,
    PluginResponse, PluginScope, PluginStore, RouteContext, RouteHandler,
};
pub use types::{Actor, InstalledPluginRecord, LifecycleState, PluginStatus};
