// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between the runtime, its collaborators, and plugin modules.

pub mod module;
pub mod store;

pub use module::{
    EntryContext, HandlerReply, Middleware, MiddlewareOutcome, PluginEntry, PluginRequest,
    PluginResponse, PluginScope, RouteContext, RouteHandler,
};
pub use store::PluginStore;
