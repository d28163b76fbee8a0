// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence backends for the Plinth plugin runtime.
//!
//! Both backends implement [`plinth_core::PluginStore`]: [`MemoryStore`] for
//! tests and throwaway hosts, [`SqliteStore`] for durable installs.

pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
