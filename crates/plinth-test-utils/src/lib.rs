// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Plinth integration tests.
//!
//! # Components
//!
//! - [`PackageBuilder`] - builds plugin archives in memory
//! - [`TestHost`] - a plugin host over a temp directory and in-memory store
//! - [`modules`] - native route, entry, and middleware modules with fixed behavior

pub mod harness;
pub mod modules;
pub mod package;

pub use harness::{ADMIN_TOKEN, TestHost, TestHostBuilder, USER_TOKEN};
pub use package::PackageBuilder;
