// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-plugin-id mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per plugin id. Operations on different ids never contend.
#[derive(Default)]
pub struct IdLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id.to_string()).or_default().value())
    }

    /// Waits for exclusive access to `id`.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        self.slot(id).lock_owned().await
    }

    /// Takes the lock only if nobody holds it.
    pub fn try_lock(&self, id: &str) -> Option<OwnedMutexGuard<()>> {
        self.slot(id).try_lock_owned().ok()
    }

    /// Drops the entry for `id` when no one holds or waits on it.
    pub fn forget(&self, id: &str) {
        self.locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
