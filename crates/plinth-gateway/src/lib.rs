// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP boundary for the Plinth plugin runtime.
//!
//! Requests under the reserved route prefix are handed to the [`Dispatcher`],
//! which resolves the owning plugin, enforces permissions and rate limits,
//! runs middleware and the handler in isolation, and always answers with a
//! JSON envelope. The admin API exposes the lifecycle manager over HTTP.

pub mod admin;
pub mod auth;
pub mod dispatcher;
pub mod envelope;
pub mod rate_limit;
pub mod server;

pub use admin::ApiError;
pub use auth::{ADMIN_PERMISSION, ActorResolver, require_admin};
pub use dispatcher::{DispatchResponse, Dispatcher};
pub use envelope::Envelope;
pub use rate_limit::{RateDecision, RateLimiter, WindowKey};
pub use server::{GatewayState, router, start_server};
