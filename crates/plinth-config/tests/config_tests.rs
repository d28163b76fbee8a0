// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Plinth configuration system.

use plinth_config::diagnostic::ConfigError;
use plinth_config::model::StorageBackend;
use plinth_config::{load_and_validate_str, load_config_from_str, render_report};

#[test]
fn valid_toml_deserializes_into_plinth_config() {
    let toml = r#"
[server]
host = "0.0.0.0"
port = 9000
route_prefix = "/ext"
request_timeout_secs = 5

[[auth.tokens]]
token = "t-admin"
actor_id = "alice"
roles = ["admin"]

[[auth.tokens]]
token = "t-editor"
actor_id = "bob"
permissions = ["write:content"]

[plugins]
plugins_dir = "/srv/plinth/plugins"
backups_dir = "/srv/plinth/backups"

[sync]
enabled = false

[rate_limit]
max_tracked_clients = 500

[storage]
backend = "memory"

[logging]
level = "debug"
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.route_prefix, "/ext");
    assert_eq!(config.server.admin_prefix, "/api/admin/plugins");
    assert_eq!(config.server.request_timeout_secs, 5);
    assert_eq!(config.auth.tokens.len(), 2);
    assert_eq!(config.auth.tokens[0].roles, vec!["admin"]);
    assert_eq!(config.auth.tokens[1].permissions, vec!["write:content"]);
    assert_eq!(config.plugins.plugins_dir, "/srv/plinth/plugins");
    assert_eq!(
        config.plugins.staging_path(),
        std::path::PathBuf::from("/srv/plinth/plugins/.staging")
    );
    assert!(!config.sync.enabled);
    assert_eq!(config.rate_limit.max_tracked_clients, 500);
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn empty_toml_uses_defaults() {
    let config = load_config_from_str("").expect("defaults");
    assert_eq!(config.server.port, 8420);
    assert_eq!(config.server.route_prefix, "/api/plugins");
    assert!(config.sync.enabled);
    assert_eq!(config.sync.interval_secs, 60);
    assert_eq!(config.rate_limit.max_tracked_clients, 10_000);
}

#[test]
fn unknown_key_gets_suggestion_and_span() {
    let toml = "[server]\nprot = 9000\n";
    let errors = load_and_validate_str(toml).expect_err("unknown key");
    let (table, suggestion, span) = errors
        .iter()
        .find_map(|e| match e {
            ConfigError::UnknownKey {
                table,
                suggestion,
                span,
                ..
            } => Some((table.clone(), suggestion.clone(), *span)),
            _ => None,
        })
        .expect("an UnknownKey diagnostic");
    assert_eq!(table, "server");
    assert_eq!(suggestion.as_deref(), Some("port"));
    let span = span.expect("span into the inline source");
    assert_eq!(&toml[span.offset()..span.offset() + span.len()], "prot");
}

#[test]
fn misspelt_section_is_reported_with_its_header() {
    let toml = "[servr]\nport = 9000\n";
    let errors = load_and_validate_str(toml).expect_err("unknown section");
    assert!(errors.iter().any(|e| matches!(
        e,
        ConfigError::UnknownSection { suggestion: Some(s), span: Some(_), .. } if s == "server"
    )));
}

#[test]
fn token_without_actor_is_missing_a_key() {
    let toml = "[[auth.tokens]]\ntoken = \"secret\"\n";
    let errors = load_and_validate_str(toml).expect_err("missing actor_id");
    assert!(errors.iter().any(
        |e| matches!(e, ConfigError::MissingKey { key, .. } if key.ends_with("actor_id"))
    ));
}

#[test]
fn rendered_report_carries_the_hint() {
    let errors = load_and_validate_str("[sync]\nintervl_secs = 5\n").expect_err("unknown key");
    let report = render_report(&errors);
    assert!(report.contains("intervl_secs"), "{report}");
    assert!(report.contains("did you mean `interval_secs`?"), "{report}");
}

#[test]
fn zero_hook_timeout_is_rejected() {
    let errors = load_and_validate_str("[runtime]\nhook_timeout_ms = 0\n").expect_err("invalid");
    assert!(errors.iter().any(
        |e| matches!(e, ConfigError::Validation { message } if message.contains("hook_timeout_ms"))
    ));
}

#[test]
fn wrong_type_is_reported() {
    let toml = "[server]\nport = \"eighty\"\n";
    let errors = load_and_validate_str(toml).expect_err("type error");
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidType { key, .. } if key.contains("port")))
    );
}

#[test]
fn semantic_validation_runs_after_parsing() {
    let toml = "[server]\nrequest_timeout_secs = 0\n";
    let errors = load_and_validate_str(toml).expect_err("validation error");
    assert!(errors.iter().any(
        |e| matches!(e, ConfigError::Validation { message } if message.contains("request_timeout_secs"))
    ));
}
