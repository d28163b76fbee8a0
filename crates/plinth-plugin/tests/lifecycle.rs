// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle manager integration tests over a real plugin directory.

use std::sync::Arc;

use serde_json::json;

use plinth_core::types::{Pagination, RecordFilter};
use plinth_core::{HttpMethod, LifecycleState, PlinthError, PluginStatus};
use plinth_plugin::{InstallOptions, RegistryEvent, UninstallOptions};
use plinth_test_utils::modules::{CountingEntry, FailingEntry, Greeting};
use plinth_test_utils::{PackageBuilder, TestHost};

fn activate() -> InstallOptions {
    InstallOptions {
        activate: true,
        ..InstallOptions::default()
    }
}

fn staging_is_empty(host: &TestHost) -> bool {
    match std::fs::read_dir(host.plugins_dir().join(".staging")) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

#[tokio::test]
async fn install_places_files_and_persists_record() {
    let (host, entry) = TestHost::hello_world().unwrap();
    let outcome = host
        .install(&PackageBuilder::hello_world(), InstallOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.record.status, PluginStatus::Installed);
    assert!(!outcome.record.is_active);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("compiled-in module"));
    assert!(host.plugins_dir().join("hello-world/plugin.json").is_file());
    assert!(staging_is_empty(&host));
    assert!(!host.registry().is_plugin_active("hello-world").await);
    assert_eq!(entry.activations(), 0);

    let info = host.lifecycle().get("hello-world").await.unwrap();
    assert_eq!(info.state, LifecycleState::InstalledInactive);
    assert_eq!(info.routes, vec!["GET /hello".to_string()]);
}

#[tokio::test]
async fn duplicate_install_without_overwrite_conflicts() {
    let (host, _) = TestHost::hello_world().unwrap();
    host.install(&PackageBuilder::hello_world(), InstallOptions::default())
        .await
        .unwrap();
    let err = host
        .install(&PackageBuilder::hello_world(), InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlinthError::Conflict(_)), "{err}");
    assert!(staging_is_empty(&host));
}

#[tokio::test]
async fn overwrite_with_backup_keeps_exactly_one_backup() {
    let (host, _) = TestHost::hello_world().unwrap();
    host.install(&PackageBuilder::hello_world(), InstallOptions::default())
        .await
        .unwrap();
    host.lifecycle()
        .configure("hello-world", json!({"greeting": "hi"}), "admin")
        .await
        .unwrap();

    let upgrade = PackageBuilder::new("hello-world", "1.1.0").route("GET", "/hello", "routes/hello.wasm");
    let outcome = host
        .install(
            &upgrade,
            InstallOptions {
                overwrite: true,
                backup: true,
                ..InstallOptions::default()
            },
        )
        .await
        .unwrap();

    let backup = outcome.backup.expect("backup taken");
    assert_eq!(backup.version, "1.0.0");
    assert_eq!(backup.config, Some(json!({"greeting": "hi"})));
    assert!(std::path::Path::new(&backup.path).join("plugin.json").is_file());

    let backups = host.store().list_backups("hello-world").await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(outcome.record.version, "1.1.0");
    // Configuration survives the upgrade.
    assert_eq!(
        host.store().get_config("hello-world").await.unwrap(),
        Some(json!({"greeting": "hi"}))
    );
}

#[tokio::test]
async fn overwriting_an_active_plugin_reactivates_it() {
    let (host, entry) = TestHost::hello_world().unwrap();
    host.install(&PackageBuilder::hello_world(), activate()).await.unwrap();

    let outcome = host
        .install(
            &PackageBuilder::new("hello-world", "2.0.0").route("GET", "/hello", "routes/hello.wasm"),
            InstallOptions {
                overwrite: true,
                ..InstallOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(outcome.record.is_active);
    let live = host.registry().get_plugin("hello-world").await.unwrap();
    assert_eq!(live.manifest.version, "2.0.0");
    assert_eq!(entry.activations(), 2);
    assert_eq!(entry.deactivations(), 1);
}

#[tokio::test]
async fn failed_overwrite_keeps_the_live_version_serving() {
    let (host, entry) = TestHost::hello_world().unwrap();
    host.install(&PackageBuilder::hello_world(), activate()).await.unwrap();
    // A plain file where the backups directory should go makes the snapshot fail.
    std::fs::write(host.path().join("backups"), b"not a directory").unwrap();

    let upgrade = PackageBuilder::new("hello-world", "1.1.0").route("GET", "/hello", "routes/hello.wasm");
    let err = host
        .install(
            &upgrade,
            InstallOptions {
                overwrite: true,
                backup: true,
                ..InstallOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PlinthError::Io(_)), "{err}");

    let record = host.store().get_record("hello-world").await.unwrap().unwrap();
    assert_eq!(record.version, "1.0.0");
    assert!(record.is_active);
    assert_eq!(record.status, PluginStatus::Installed);
    assert!(host.registry().is_plugin_active("hello-world").await);
    assert!(
        host.registry()
            .get_plugin_by_route(HttpMethod::Get, "/hello")
            .await
            .is_some()
    );
    assert_eq!(entry.deactivations(), 0);
    assert!(staging_is_empty(&host));
}

#[tokio::test]
async fn activate_deactivate_round_trips() {
    let (host, entry) = TestHost::hello_world().unwrap();
    host.install(&PackageBuilder::hello_world(), InstallOptions::default())
        .await
        .unwrap();
    let lifecycle = host.lifecycle();

    let record = lifecycle.activate("hello-world", "admin").await.unwrap();
    assert!(record.is_active);
    assert!(record.last_activated.is_some());
    let hit = host
        .registry()
        .get_plugin_by_route(HttpMethod::Get, "/hello")
        .await
        .unwrap();
    assert_eq!(hit.plugin_id(), "hello-world");

    let record = lifecycle.deactivate("hello-world", "admin").await.unwrap();
    assert!(!record.is_active);
    assert!(host.registry().get_plugin_by_route(HttpMethod::Get, "/hello").await.is_none());

    let record = lifecycle.activate("hello-world", "admin").await.unwrap();
    assert!(record.is_active);
    assert!(host.registry().is_plugin_active("hello-world").await);
    assert_eq!(entry.activations(), 2);

    let stored = host.store().get_record("hello-world").await.unwrap().unwrap();
    assert!(stored.is_active);
}

#[tokio::test]
async fn deactivating_an_inactive_plugin_is_a_no_op() {
    let (host, entry) = TestHost::hello_world().unwrap();
    host.install(&PackageBuilder::hello_world(), InstallOptions::default())
        .await
        .unwrap();

    let first = host.lifecycle().deactivate("hello-world", "admin").await.unwrap();
    let second = host.lifecycle().deactivate("hello-world", "admin").await.unwrap();
    assert!(!first.is_active);
    assert_eq!(first, second);
    assert_eq!(entry.deactivations(), 0);
}

#[tokio::test]
async fn activation_failure_marks_record_failed() {
    let native = plinth_plugin::NativeRuntime::new()
        .with_entry("grumpy", "index.wasm", Arc::new(FailingEntry))
        .with_route("grumpy", "routes/hello.wasm", Arc::new(Greeting::new("never")));
    let host = TestHost::builder().with_native(native).build().unwrap();
    let package = PackageBuilder::new("grumpy", "1.0.0").route("GET", "/grumpy", "routes/hello.wasm");

    let outcome = host.install(&package, activate()).await.unwrap();
    let error = outcome.activation_error.expect("activation failed");
    assert!(error.contains("refusing to activate"));
    assert_eq!(outcome.record.status, PluginStatus::Failed);
    assert!(!outcome.record.is_active);
    assert!(outcome.record.last_error().unwrap().contains("refusing"));

    assert!(!host.registry().is_plugin_active("grumpy").await);
    assert!(host.registry().get_plugin_by_route(HttpMethod::Get, "/grumpy").await.is_none());
    let info = host.lifecycle().get("grumpy").await.unwrap();
    assert_eq!(info.state, LifecycleState::Failed);
}

#[tokio::test]
async fn missing_entry_module_leaves_no_plugin_directory() {
    // No native entry registered and no main file in the package.
    let host = TestHost::builder().build().unwrap();
    let err = host
        .install(&PackageBuilder::new("orphan", "1.0.0"), InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlinthError::Load { .. }), "{err}");
    assert!(!host.plugins_dir().join("orphan").exists());
    assert!(staging_is_empty(&host));

    let record = host.store().get_record("orphan").await.unwrap().unwrap();
    assert_eq!(record.status, PluginStatus::Failed);

    // A failed record does not block a retry.
    host.native
        .register("orphan", "index.wasm", plinth_plugin::NativeModule::Entry(Arc::new(CountingEntry::default())));
    let outcome = host
        .install(&PackageBuilder::new("orphan", "1.0.0"), InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.record.status, PluginStatus::Installed);
}

#[tokio::test]
async fn invalid_package_is_rejected_before_anything_is_written() {
    let host = TestHost::builder().build().unwrap();
    let package = PackageBuilder::new("broken", "not-semver").remove("category");
    let err = host
        .install(&package, InstallOptions::default())
        .await
        .unwrap_err();
    let PlinthError::Validation { errors } = err else {
        panic!("expected validation error, got {err}");
    };
    assert!(errors.iter().any(|e| e.contains("category")));
    assert!(errors.iter().any(|e| e.contains("version")));
    assert!(host.store().get_record("broken").await.unwrap().is_none());
    assert!(!host.plugins_dir().join("broken").exists());
    assert!(staging_is_empty(&host));
}

#[tokio::test]
async fn high_risk_needs_skip_validation() {
    let native = plinth_plugin::NativeRuntime::new().with_entry(
        "root-kit",
        "index.wasm",
        Arc::new(CountingEntry::default()),
    );
    let host = TestHost::builder().with_native(native).build().unwrap();
    let package = PackageBuilder::new("root-kit", "1.0.0").permission("admin:access");

    let err = host
        .install(&package, InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlinthError::Validation { .. }));
    assert!(err.to_string().contains("high-risk"));

    let outcome = host
        .install(
            &package,
            InstallOptions {
                skip_validation: true,
                ..InstallOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.record.status, PluginStatus::Installed);
}

#[tokio::test]
async fn uninstalling_an_active_plugin_conflicts_and_changes_nothing() {
    let (host, _) = TestHost::hello_world().unwrap();
    host.install(&PackageBuilder::hello_world(), activate()).await.unwrap();
    let before = host.store().get_record("hello-world").await.unwrap();

    let err = host
        .lifecycle()
        .uninstall("hello-world", "admin", UninstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlinthError::Conflict(_)));
    assert_eq!(host.store().get_record("hello-world").await.unwrap(), before);
    assert!(host.registry().is_plugin_active("hello-world").await);
    assert!(host.plugins_dir().join("hello-world").is_dir());
}

#[tokio::test]
async fn uninstall_removes_files_record_and_backups() {
    let (host, _) = TestHost::hello_world().unwrap();
    host.install(&PackageBuilder::hello_world(), InstallOptions::default())
        .await
        .unwrap();
    host.install(
        &PackageBuilder::hello_world(),
        InstallOptions {
            overwrite: true,
            backup: true,
            ..InstallOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(host.store().list_backups("hello-world").await.unwrap().len(), 1);

    host.lifecycle()
        .uninstall("hello-world", "admin", UninstallOptions::default())
        .await
        .unwrap();
    assert!(host.store().get_record("hello-world").await.unwrap().is_none());
    assert!(host.store().list_backups("hello-world").await.unwrap().is_empty());
    assert!(!host.plugins_dir().join("hello-world").exists());
    assert!(!host.path().join("backups/hello-world").exists());
    assert!(host.registry().get_plugin("hello-world").await.is_none());

    let err = host.lifecycle().get("hello-world").await.unwrap_err();
    assert!(matches!(err, PlinthError::NotFound { .. }));
}

#[tokio::test]
async fn uninstall_with_backup_keeps_a_snapshot() {
    let (host, _) = TestHost::hello_world().unwrap();
    host.install(&PackageBuilder::hello_world(), InstallOptions::default())
        .await
        .unwrap();
    host.lifecycle()
        .uninstall("hello-world", "admin", UninstallOptions { backup: true })
        .await
        .unwrap();
    assert_eq!(host.store().list_backups("hello-world").await.unwrap().len(), 1);
    assert!(host.store().get_record("hello-world").await.unwrap().is_none());
}

#[tokio::test]
async fn configure_merges_without_reactivating() {
    let (host, entry) = TestHost::hello_world().unwrap();
    host.install(
        &PackageBuilder::hello_world().set("defaultConfig", json!({"color": "blue", "size": 2})),
        activate(),
    )
    .await
    .unwrap();
    assert_eq!(
        host.store().get_config("hello-world").await.unwrap(),
        Some(json!({"color": "blue", "size": 2}))
    );

    let merged = host
        .lifecycle()
        .configure("hello-world", json!({"size": 3, "color": null, "extra": true}), "admin")
        .await
        .unwrap();
    assert_eq!(merged, json!({"size": 3, "extra": true}));
    assert_eq!(entry.activations(), 1);

    let err = host
        .lifecycle()
        .configure("hello-world", json!([1, 2]), "admin")
        .await
        .unwrap_err();
    assert!(matches!(err, PlinthError::Validation { .. }));

    let err = host
        .lifecycle()
        .configure("missing", json!({}), "admin")
        .await
        .unwrap_err();
    assert!(matches!(err, PlinthError::NotFound { .. }));
}

#[tokio::test]
async fn list_filters_and_paginates() {
    let native = plinth_plugin::NativeRuntime::new();
    for id in ["aa", "bb", "cc"] {
        native.register(id, "index.wasm", plinth_plugin::NativeModule::Entry(Arc::new(CountingEntry::default())));
    }
    let host = TestHost::builder().with_native(native).build().unwrap();
    for id in ["cc", "aa", "bb"] {
        host.install(&PackageBuilder::new(id, "1.0.0"), InstallOptions::default())
            .await
            .unwrap();
    }
    host.lifecycle().activate("bb", "admin").await.unwrap();

    let all = host
        .lifecycle()
        .list(&RecordFilter::default(), Pagination { offset: 1, limit: 1 })
        .await
        .unwrap();
    assert_eq!(all.total, 3);
    assert_eq!(all.items.len(), 1);
    assert_eq!(all.items[0].record.plugin_id, "bb");
    assert!(all.items[0].live);

    let active = host
        .lifecycle()
        .list(
            &RecordFilter {
                is_active: Some(true),
                ..RecordFilter::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(active.total, 1);
    assert_eq!(active.items[0].state, LifecycleState::InstalledActive);
}

#[tokio::test]
async fn lifecycle_emits_events_in_order() {
    let (host, _) = TestHost::hello_world().unwrap();
    let mut events = host.registry().subscribe();

    host.install(&PackageBuilder::hello_world(), activate()).await.unwrap();
    host.lifecycle()
        .configure("hello-world", json!({"a": 1}), "admin")
        .await
        .unwrap();
    host.lifecycle().deactivate("hello-world", "admin").await.unwrap();
    host.lifecycle()
        .uninstall("hello-world", "admin", UninstallOptions::default())
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let id = "hello-world".to_string();
    assert_eq!(
        seen,
        vec![
            RegistryEvent::Installed {
                plugin_id: id.clone(),
                version: "1.0.0".to_string()
            },
            RegistryEvent::Activated { plugin_id: id.clone() },
            RegistryEvent::Configured { plugin_id: id.clone() },
            RegistryEvent::Deactivated { plugin_id: id.clone() },
            RegistryEvent::Uninstalled { plugin_id: id },
        ]
    );
}

#[tokio::test]
async fn lifecycle_hooks_fire_around_transitions() {
    let (host, _) = TestHost::hello_world().unwrap();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    for name in [
        plinth_hooks::HookName::BeforeInstall,
        plinth_hooks::HookName::AfterInstall,
        plinth_hooks::HookName::BeforeActivate,
        plinth_hooks::HookName::AfterActivate,
    ] {
        let seen = Arc::clone(&seen);
        let label = name.to_string();
        host.host
            .hooks()
            .add_action(
                name,
                10,
                plinth_hooks::action_fn(move |payload| {
                    let seen = Arc::clone(&seen);
                    let label = label.clone();
                    async move {
                        seen.lock().unwrap().push((label, payload["pluginId"].clone()));
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();
    }

    host.install(&PackageBuilder::hello_world(), activate()).await.unwrap();
    let seen = seen.lock().unwrap().clone();
    let labels: Vec<&str> = seen.iter().map(|(l, _)| l.as_str()).collect();
    assert_eq!(
        labels,
        vec!["before-install", "after-install", "before-activate", "after-activate"]
    );
    assert!(seen.iter().all(|(_, id)| id == "hello-world"));
}

#[tokio::test]
async fn concurrent_activate_and_uninstall_stay_consistent() {
    let (host, _) = TestHost::hello_world().unwrap();
    host.install(&PackageBuilder::hello_world(), InstallOptions::default())
        .await
        .unwrap();
    let lifecycle = Arc::clone(host.lifecycle());

    let activate = {
        let lifecycle = Arc::clone(&lifecycle);
        tokio::spawn(async move { lifecycle.activate("hello-world", "admin").await })
    };
    let uninstall = {
        let lifecycle = Arc::clone(&lifecycle);
        tokio::spawn(async move {
            lifecycle
                .uninstall("hello-world", "admin", UninstallOptions::default())
                .await
        })
    };
    let activated = activate.await.unwrap();
    let uninstalled = uninstall.await.unwrap();

    let record = host.store().get_record("hello-world").await.unwrap();
    let live = host.registry().is_plugin_active("hello-world").await;
    match (activated, uninstalled) {
        // Activate first: uninstall refuses.
        (Ok(_), Err(PlinthError::Conflict(_))) => {
            assert!(live);
            assert!(record.unwrap().is_active);
        }
        // Uninstall first: activate finds nothing.
        (Err(PlinthError::NotFound { .. }), Ok(())) => {
            assert!(!live);
            assert!(record.is_none());
        }
        (a, u) => panic!("inconsistent outcome: activate={a:?} uninstall={u:?}"),
    }
}

#[tokio::test]
async fn restart_restores_active_plugins() {
    let (host, entry) = TestHost::hello_world().unwrap();
    host.install(&PackageBuilder::hello_world(), activate()).await.unwrap();

    host.host.shutdown().await;
    assert!(!host.registry().is_plugin_active("hello-world").await);
    let stored = host.store().get_record("hello-world").await.unwrap().unwrap();
    assert!(stored.is_active, "shutdown leaves records untouched");

    let report = host.host.start().await.unwrap();
    assert_eq!(report.activated, vec!["hello-world".to_string()]);
    assert!(report.failed.is_empty());
    assert_eq!(entry.activations(), 2);
}
