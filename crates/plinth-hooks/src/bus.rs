// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Priority-ordered hook bus.
//!
//! Registrations for one hook name run in ascending priority; equal
//! priorities run in registration order. The registration list is
//! snapshotted before callbacks run, so a callback may register or remove
//! hooks without deadlocking the bus. Every callback runs under the bus's
//! callback timeout; one that overruns counts as failed.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use plinth_core::PlinthError;
use plinth_core::manifest::HookKind;

use crate::name::HookName;

/// Priority used when a registration does not specify one.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Longest a single callback may run before it is abandoned.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Fire-and-forget hook callback.
#[async_trait]
pub trait ActionHook: Send + Sync {
    async fn call(&self, payload: &Value) -> Result<(), PlinthError>;
}

/// Value-transforming hook callback.
#[async_trait]
pub trait FilterHook: Send + Sync {
    async fn apply(&self, value: Value, context: &Value) -> Result<Value, PlinthError>;
}

/// A callback tagged with its kind.
#[derive(Clone)]
pub enum HookCallback {
    Action(Arc<dyn ActionHook>),
    Filter(Arc<dyn FilterHook>),
}

impl HookCallback {
    pub fn kind(&self) -> HookKind {
        match self {
            HookCallback::Action(_) => HookKind::Action,
            HookCallback::Filter(_) => HookKind::Filter,
        }
    }
}

impl std::fmt::Debug for HookCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HookCallback::{}", self.kind())
    }
}

/// Handle returned by a registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

struct Registration {
    id: HookId,
    priority: i32,
    owner: Option<String>,
    callback: HookCallback,
}

/// Named action and filter extension points.
pub struct HookBus {
    hooks: RwLock<HashMap<HookName, Vec<Registration>>>,
    next_id: AtomicU64,
    callback_timeout: Duration,
}

/// How a single callback invocation ended.
enum Outcome<T> {
    Done(T),
    Failed(PlinthError),
    Panicked,
    TimedOut,
}

impl Default for HookBus {
    fn default() -> Self {
        Self::new()
    }
}

impl HookBus {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CALLBACK_TIMEOUT)
    }

    pub fn with_timeout(callback_timeout: Duration) -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            callback_timeout,
        }
    }

    pub fn callback_timeout(&self) -> Duration {
        self.callback_timeout
    }

    async fn run<T>(
        &self,
        fut: impl Future<Output = Result<T, PlinthError>> + Send,
    ) -> Outcome<T> {
        let guarded = AssertUnwindSafe(fut).catch_unwind();
        match tokio::time::timeout(self.callback_timeout, guarded).await {
            Ok(Ok(Ok(value))) => Outcome::Done(value),
            Ok(Ok(Err(e))) => Outcome::Failed(e),
            Ok(Err(_)) => Outcome::Panicked,
            Err(_) => Outcome::TimedOut,
        }
    }

    /// Registers a callback under `name`.
    ///
    /// Fails with a validation error when the callback kind does not match
    /// the kind implied by a built-in name, or the kind already registered
    /// under a custom name.
    pub async fn register(
        &self,
        name: HookName,
        priority: i32,
        owner: Option<&str>,
        callback: HookCallback,
    ) -> Result<HookId, PlinthError> {
        let kind = callback.kind();
        let mut hooks = self.hooks.write().await;
        let expected = name.builtin_kind().or_else(|| {
            hooks
                .get(&name)
                .and_then(|regs| regs.first())
                .map(|r| r.callback.kind())
        });
        if let Some(expected) = expected
            && expected != kind
        {
            return Err(PlinthError::validation(format!(
                "hook '{name}' is a {expected} hook, cannot register a {kind} callback"
            )));
        }

        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let regs = hooks.entry(name.clone()).or_default();
        // Ids grow monotonically, so inserting after every registration with
        // priority <= ours keeps ties in registration order.
        let pos = regs.partition_point(|r| r.priority <= priority);
        regs.insert(
            pos,
            Registration {
                id,
                priority,
                owner: owner.map(str::to_string),
                callback,
            },
        );
        debug!(hook = %name, priority, owner = ?owner, %kind, "hook registered");
        Ok(id)
    }

    /// Registers an action callback.
    pub async fn add_action(
        &self,
        name: HookName,
        priority: i32,
        callback: Arc<dyn ActionHook>,
    ) -> Result<HookId, PlinthError> {
        self.register(name, priority, None, HookCallback::Action(callback))
            .await
    }

    /// Registers a filter callback.
    pub async fn add_filter(
        &self,
        name: HookName,
        priority: i32,
        callback: Arc<dyn FilterHook>,
    ) -> Result<HookId, PlinthError> {
        self.register(name, priority, None, HookCallback::Filter(callback))
            .await
    }

    /// Removes one registration. Returns false if it was already gone.
    pub async fn remove(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.write().await;
        let mut removed = false;
        for regs in hooks.values_mut() {
            let before = regs.len();
            regs.retain(|r| r.id != id);
            removed |= regs.len() != before;
        }
        hooks.retain(|_, regs| !regs.is_empty());
        removed
    }

    /// Removes every registration owned by a plugin and returns the count.
    pub async fn remove_owner(&self, owner: &str) -> usize {
        let mut hooks = self.hooks.write().await;
        let mut removed = 0;
        for regs in hooks.values_mut() {
            let before = regs.len();
            regs.retain(|r| r.owner.as_deref() != Some(owner));
            removed += before - regs.len();
        }
        hooks.retain(|_, regs| !regs.is_empty());
        if removed > 0 {
            debug!(owner, removed, "removed plugin hooks");
        }
        removed
    }

    pub async fn has_hooks(&self, name: &HookName) -> bool {
        self.hooks
            .read()
            .await
            .get(name)
            .is_some_and(|regs| !regs.is_empty())
    }

    /// Owners of the registrations under `name`, in execution order.
    pub async fn owners(&self, name: &HookName) -> Vec<Option<String>> {
        self.hooks
            .read()
            .await
            .get(name)
            .map(|regs| regs.iter().map(|r| r.owner.clone()).collect())
            .unwrap_or_default()
    }

    async fn snapshot(&self, name: &HookName) -> Vec<(Option<String>, HookCallback)> {
        self.hooks
            .read()
            .await
            .get(name)
            .map(|regs| {
                regs.iter()
                    .map(|r| (r.owner.clone(), r.callback.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Runs every action registered under `name` and returns the number of
    /// callbacks that failed.
    ///
    /// Errors, panics and timeouts are logged and never stop the remaining
    /// callbacks.
    pub async fn do_action(&self, name: &HookName, payload: &Value) -> usize {
        let mut failures = 0;
        for (owner, callback) in self.snapshot(name).await {
            let HookCallback::Action(action) = callback else {
                continue;
            };
            match self.run(action.call(payload)).await {
                Outcome::Done(()) => {}
                Outcome::Failed(e) => {
                    failures += 1;
                    warn!(hook = %name, owner = ?owner, error = %e, "action hook failed");
                }
                Outcome::Panicked => {
                    failures += 1;
                    warn!(hook = %name, owner = ?owner, "action hook panicked");
                }
                Outcome::TimedOut => {
                    failures += 1;
                    warn!(
                        hook = %name,
                        owner = ?owner,
                        timeout_ms = self.callback_timeout.as_millis() as u64,
                        "action hook timed out"
                    );
                }
            }
        }
        failures
    }

    /// Threads `value` through every filter registered under `name`.
    ///
    /// If a filter fails, panics or times out, the chain stops and the last
    /// good value is returned.
    pub async fn apply_filters(&self, name: &HookName, value: Value, context: &Value) -> Value {
        let mut current = value;
        for (owner, callback) in self.snapshot(name).await {
            let HookCallback::Filter(filter) = callback else {
                continue;
            };
            let input = current.clone();
            match self.run(filter.apply(input, context)).await {
                Outcome::Done(next) => current = next,
                Outcome::Failed(e) => {
                    warn!(hook = %name, owner = ?owner, error = %e, "filter hook failed, keeping last value");
                    break;
                }
                Outcome::Panicked => {
                    warn!(hook = %name, owner = ?owner, "filter hook panicked, keeping last value");
                    break;
                }
                Outcome::TimedOut => {
                    warn!(hook = %name, owner = ?owner, "filter hook timed out, keeping last value");
                    break;
                }
            }
        }
        current
    }
}

struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> ActionHook for FnAction<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), PlinthError>> + Send,
{
    async fn call(&self, payload: &Value) -> Result<(), PlinthError> {
        (self.0)(payload.clone()).await
    }
}

struct FnFilter<F>(F);

#[async_trait]
impl<F, Fut> FilterHook for FnFilter<F>
where
    F: Fn(Value, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, PlinthError>> + Send,
{
    async fn apply(&self, value: Value, context: &Value) -> Result<Value, PlinthError> {
        (self.0)(value, context.clone()).await
    }
}

/// Wraps an async closure as an action callback.
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn ActionHook>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), PlinthError>> + Send + 'static,
{
    Arc::new(FnAction(f))
}

/// Wraps an async closure `(value, context)` as a filter callback.
pub fn filter_fn<F, Fut>(f: F) -> Arc<dyn FilterHook>
where
    F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, PlinthError>> + Send + 'static,
{
    Arc::new(FnFilter(f))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Arc<dyn ActionHook> {
        let log = log.clone();
        let tag = tag.to_string();
        action_fn(move |_payload| {
            let log = log.clone();
            let tag = tag.clone();
            async move {
                log.lock().unwrap().push(tag);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn actions_run_in_priority_then_insertion_order() {
        let bus = HookBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.add_action(HookName::RequestStart, 20, recorder(&log, "late"))
            .await
            .unwrap();
        bus.add_action(HookName::RequestStart, 5, recorder(&log, "early"))
            .await
            .unwrap();
        bus.add_action(HookName::RequestStart, 20, recorder(&log, "late-2"))
            .await
            .unwrap();
        bus.add_action(HookName::RequestStart, 10, recorder(&log, "mid"))
            .await
            .unwrap();

        let failures = bus.do_action(&HookName::RequestStart, &json!({})).await;
        assert_eq!(failures, 0);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["early", "mid", "late", "late-2"]
        );
    }

    struct Panicky;

    #[async_trait]
    impl ActionHook for Panicky {
        async fn call(&self, _payload: &Value) -> Result<(), PlinthError> {
            panic!("plugin bug")
        }
    }

    #[tokio::test]
    async fn failing_and_panicking_actions_are_isolated() {
        let bus = HookBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.add_action(
            HookName::Error,
            1,
            action_fn(|_| async { Err(PlinthError::Internal("boom".into())) }),
        )
        .await
        .unwrap();
        bus.add_action(HookName::Error, 2, Arc::new(Panicky))
            .await
            .unwrap();
        bus.add_action(HookName::Error, 3, recorder(&log, "survivor"))
            .await
            .unwrap();

        let failures = bus.do_action(&HookName::Error, &json!({})).await;
        assert_eq!(failures, 2);
        assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
    }

    #[tokio::test]
    async fn filters_chain_values() {
        let bus = HookBus::new();
        bus.add_filter(
            HookName::ResponseFilter,
            10,
            filter_fn(|v, _| async move { Ok(json!(v.as_i64().unwrap_or(0) + 1)) }),
        )
        .await
        .unwrap();
        bus.add_filter(
            HookName::ResponseFilter,
            20,
            filter_fn(|v, ctx| async move {
                let factor = ctx["factor"].as_i64().unwrap_or(1);
                Ok(json!(v.as_i64().unwrap_or(0) * factor))
            }),
        )
        .await
        .unwrap();

        let out = bus
            .apply_filters(&HookName::ResponseFilter, json!(2), &json!({"factor": 10}))
            .await;
        assert_eq!(out, json!(30));
    }

    #[tokio::test]
    async fn failing_filter_returns_last_good_value() {
        let bus = HookBus::new();
        let reached = Arc::new(Mutex::new(false));
        bus.add_filter(
            HookName::ResponseFilter,
            1,
            filter_fn(|_, _| async { Ok(json!("first")) }),
        )
        .await
        .unwrap();
        bus.add_filter(
            HookName::ResponseFilter,
            2,
            filter_fn(|_, _| async { Err(PlinthError::Internal("bad filter".into())) }),
        )
        .await
        .unwrap();
        let flag = reached.clone();
        bus.add_filter(
            HookName::ResponseFilter,
            3,
            filter_fn(move |v, _| {
                let flag = flag.clone();
                async move {
                    *flag.lock().unwrap() = true;
                    Ok(v)
                }
            }),
        )
        .await
        .unwrap();

        let out = bus
            .apply_filters(&HookName::ResponseFilter, json!("original"), &Value::Null)
            .await;
        assert_eq!(out, json!("first"));
        assert!(!*reached.lock().unwrap());
    }

    #[tokio::test]
    async fn no_filters_returns_input() {
        let bus = HookBus::new();
        let out = bus
            .apply_filters(&HookName::ResponseFilter, json!({"a": 1}), &Value::Null)
            .await;
        assert_eq!(out, json!({"a": 1}));
    }

    #[tokio::test]
    async fn kind_mismatch_is_rejected() {
        let bus = HookBus::new();
        let err = bus
            .add_action(HookName::ResponseFilter, 10, action_fn(|_| async { Ok(()) }))
            .await
            .unwrap_err();
        assert!(matches!(err, PlinthError::Validation { .. }));

        let custom = HookName::Custom("seo:ping".into());
        bus.add_filter(custom.clone(), 10, filter_fn(|v, _| async move { Ok(v) }))
            .await
            .unwrap();
        assert!(
            bus.add_action(custom, 10, action_fn(|_| async { Ok(()) }))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn rejected_registration_leaves_no_empty_entry() {
        let bus = HookBus::new();
        assert!(
            bus.add_action(HookName::ResponseFilter, 10, action_fn(|_| async { Ok(()) }))
                .await
                .is_err()
        );
        assert!(bus.hooks.read().await.get(&HookName::ResponseFilter).is_none());
        assert!(bus.owners(&HookName::ResponseFilter).await.is_empty());
    }

    #[tokio::test]
    async fn hanging_action_times_out_and_the_rest_still_run() {
        let bus = HookBus::with_timeout(Duration::from_millis(50));
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.add_action(
            HookName::RequestStart,
            1,
            action_fn(|_| async {
                std::future::pending::<()>().await;
                Ok(())
            }),
        )
        .await
        .unwrap();
        bus.add_action(HookName::RequestStart, 2, recorder(&log, "after"))
            .await
            .unwrap();

        let failures = tokio::time::timeout(
            Duration::from_secs(5),
            bus.do_action(&HookName::RequestStart, &Value::Null),
        )
        .await
        .expect("a hanging action must not stall the bus");
        assert_eq!(failures, 1);
        assert_eq!(*log.lock().unwrap(), vec!["after".to_string()]);
    }

    #[tokio::test]
    async fn hanging_filter_keeps_last_good_value() {
        let bus = HookBus::with_timeout(Duration::from_millis(50));
        bus.add_filter(
            HookName::ResponseFilter,
            1,
            filter_fn(|_, _| async { Ok(json!("first")) }),
        )
        .await
        .unwrap();
        bus.add_filter(
            HookName::ResponseFilter,
            2,
            filter_fn(|v, _| async move {
                std::future::pending::<()>().await;
                Ok(v)
            }),
        )
        .await
        .unwrap();

        let out = tokio::time::timeout(
            Duration::from_secs(5),
            bus.apply_filters(&HookName::ResponseFilter, json!("original"), &Value::Null),
        )
        .await
        .expect("a hanging filter must not stall the chain");
        assert_eq!(out, json!("first"));
    }

    #[tokio::test]
    async fn remove_owner_drops_only_that_plugin() {
        let bus = HookBus::new();
        let noop = || HookCallback::Action(action_fn(|_| async { Ok(()) }));
        bus.register(HookName::AfterActivate, 10, Some("a"), noop())
            .await
            .unwrap();
        bus.register(HookName::AfterActivate, 10, Some("b"), noop())
            .await
            .unwrap();
        bus.register(HookName::RequestEnd, 10, Some("a"), noop())
            .await
            .unwrap();

        assert_eq!(bus.remove_owner("a").await, 2);
        assert_eq!(
            bus.owners(&HookName::AfterActivate).await,
            vec![Some("b".to_string())]
        );
        assert!(!bus.has_hooks(&HookName::RequestEnd).await);
    }

    #[tokio::test]
    async fn remove_by_id() {
        let bus = HookBus::new();
        let id = bus
            .add_action(HookName::RequestEnd, 10, action_fn(|_| async { Ok(()) }))
            .await
            .unwrap();
        assert!(bus.remove(id).await);
        assert!(!bus.remove(id).await);
        assert!(!bus.has_hooks(&HookName::RequestEnd).await);
    }
}
