// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic reconciliation of persisted `isActive` flags with the registry.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plinth_core::{PlinthError, PluginStatus};

use crate::locks::IdLocks;
use crate::registry::{PluginRegistry, RegistryEvent};

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Another pass was already running; nothing was done.
    pub skipped: bool,
    pub activated: Vec<String>,
    pub deactivated: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Ids left alone because a lifecycle operation held their lock.
    pub busy: Vec<String>,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        !self.activated.is_empty() || !self.deactivated.is_empty() || !self.failed.is_empty()
    }
}

/// Auto-sync monitor.
pub struct AutoSync {
    registry: Arc<PluginRegistry>,
    locks: Arc<IdLocks>,
    running: AtomicBool,
}

/// Clears the running flag when a pass ends, including on early return.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AutoSync {
    pub fn new(registry: Arc<PluginRegistry>, locks: Arc<IdLocks>) -> Self {
        Self {
            registry,
            locks,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one pass. Returns a skipped report if a pass is already in flight.
    ///
    /// Only a failure to list records aborts the pass; per-plugin failures
    /// are recorded against that plugin and the pass continues.
    pub async fn run_once(&self) -> Result<SyncReport, PlinthError> {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("auto-sync pass already running, skipping");
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        }
        let _running = RunningGuard(&self.running);

        let records = self.registry.store().list_records(None).await?;
        let mut report = SyncReport::default();
        let mut known = HashSet::with_capacity(records.len());

        for record in records {
            let id = record.plugin_id.clone();
            known.insert(id.clone());
            let Some(_guard) = self.locks.try_lock(&id) else {
                report.busy.push(id);
                continue;
            };

            let live = self.registry.is_plugin_active(&id).await;
            if record.is_active && !live && record.status != PluginStatus::Installing {
                match self.registry.activate(&id).await {
                    Ok(_) => report.activated.push(id),
                    Err(e) => {
                        let message = e.to_string();
                        warn!(plugin_id = %id, error = %message, "auto-sync activation failed");
                        self.registry.record_failure(&id, &message).await;
                        report.failed.push((id, message));
                    }
                }
            } else if !record.is_active && live {
                self.registry.deactivate(&id).await;
                report.deactivated.push(id);
            }
        }

        for id in self.registry.get_active_plugins().await {
            if known.contains(&id) {
                continue;
            }
            let Some(_guard) = self.locks.try_lock(&id) else {
                report.busy.push(id);
                continue;
            };
            // Live without a record: uninstalled by another process.
            if self.registry.unregister(&id).await {
                report.deactivated.push(id);
            }
        }

        if report.changed() {
            info!(
                activated = report.activated.len(),
                deactivated = report.deactivated.len(),
                failed = report.failed.len(),
                "auto-sync reconciled registry"
            );
        } else {
            debug!("auto-sync found registry in sync");
        }
        self.registry.emit(RegistryEvent::RegistrySynced {
            activated: report.activated.len(),
            deactivated: report.deactivated.len(),
            failed: report.failed.len(),
        });
        Ok(report)
    }

    /// Runs a pass every `interval` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; startup already initialized.
            ticker.tick().await;
            info!(interval_secs = interval.as_secs(), "auto-sync started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            warn!(error = %e, "auto-sync pass failed");
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("auto-sync stopped");
                        break;
                    }
                }
            }
        })
    }
}
