// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed plugin manifest (`plugin.json`).
//!
//! The manifest is JSON with camelCase keys. Structural validation with
//! field-level messages happens in the package validator, which works on the
//! raw JSON value; this module only describes the typed shape that a valid
//! manifest deserializes into.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::route::{HttpMethod, RouteKey};

/// File name of the manifest inside a plugin package.
pub const MANIFEST_FILE: &str = "plugin.json";

/// Entry module used when a manifest does not name one.
pub const DEFAULT_MAIN: &str = "index.wasm";

/// Plugin category shown in admin listings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PluginCategory {
    Authentication,
    Content,
    Analytics,
    Integration,
    Utility,
    Security,
    Ecommerce,
    Communication,
    Other,
}

/// Host capability a plugin may request.
///
/// Permissions are advisory metadata that feed the risk score. The only
/// enforcement happens in the route dispatcher, against the actor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum Permission {
    #[serde(rename = "read:users")]
    #[strum(serialize = "read:users")]
    ReadUsers,
    #[serde(rename = "write:users")]
    #[strum(serialize = "write:users")]
    WriteUsers,
    #[serde(rename = "read:content")]
    #[strum(serialize = "read:content")]
    ReadContent,
    #[serde(rename = "write:content")]
    #[strum(serialize = "write:content")]
    WriteContent,
    #[serde(rename = "read:settings")]
    #[strum(serialize = "read:settings")]
    ReadSettings,
    #[serde(rename = "write:settings")]
    #[strum(serialize = "write:settings")]
    WriteSettings,
    #[serde(rename = "database:read")]
    #[strum(serialize = "database:read")]
    DatabaseRead,
    #[serde(rename = "database:write")]
    #[strum(serialize = "database:write")]
    DatabaseWrite,
    #[serde(rename = "admin:access")]
    #[strum(serialize = "admin:access")]
    AdminAccess,
    #[serde(rename = "network:outbound")]
    #[strum(serialize = "network:outbound")]
    NetworkOutbound,
    #[serde(rename = "filesystem:read")]
    #[strum(serialize = "filesystem:read")]
    FilesystemRead,
    #[serde(rename = "filesystem:write")]
    #[strum(serialize = "filesystem:write")]
    FilesystemWrite,
    #[serde(rename = "email:send")]
    #[strum(serialize = "email:send")]
    EmailSend,
}

impl Permission {
    /// Every permission a manifest may request.
    pub const ALL: [Permission; 13] = [
        Permission::ReadUsers,
        Permission::WriteUsers,
        Permission::ReadContent,
        Permission::WriteContent,
        Permission::ReadSettings,
        Permission::WriteSettings,
        Permission::DatabaseRead,
        Permission::DatabaseWrite,
        Permission::AdminAccess,
        Permission::NetworkOutbound,
        Permission::FilesystemRead,
        Permission::FilesystemWrite,
        Permission::EmailSend,
    ];

    /// Risk contributed by requesting this permission.
    pub fn risk(self) -> RiskLevel {
        match self {
            Permission::AdminAccess
            | Permission::DatabaseWrite
            | Permission::WriteUsers
            | Permission::FilesystemWrite => RiskLevel::High,
            Permission::WriteContent
            | Permission::WriteSettings
            | Permission::NetworkOutbound
            | Permission::EmailSend
            | Permission::FilesystemRead => RiskLevel::Medium,
            Permission::ReadUsers
            | Permission::ReadContent
            | Permission::ReadSettings
            | Permission::DatabaseRead => RiskLevel::Low,
        }
    }
}

/// Security risk score of a package, derived from its requested permissions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Highest risk among the given permissions, `Low` when empty.
    pub fn of(permissions: &[Permission]) -> Self {
        permissions
            .iter()
            .map(|p| p.risk())
            .max()
            .unwrap_or(RiskLevel::Low)
    }
}

/// Fixed-window rate limit attached to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecl {
    pub max: u32,
    pub window_ms: u64,
}

/// Required request fields checked before a handler runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSchema {
    pub query: Vec<String>,
    pub body: Vec<String>,
}

impl RequestSchema {
    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && self.body.is_empty()
    }
}

/// A route contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDecl {
    pub method: HttpMethod,
    pub path: String,
    /// Module reference relative to the plugin root, optionally `path#export`.
    pub handler: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middleware: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<RequestSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RouteDecl {
    /// Normalized dispatch key for this route.
    pub fn key(&self) -> RouteKey {
        RouteKey::new(self.method, &self.path)
    }
}

/// Kind of hook callback a manifest hook declares.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HookKind {
    Action,
    Filter,
}

/// A hook subscription contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDecl {
    pub name: String,
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Required only for custom hook names; built-in names imply their kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<HookKind>,
}

/// An admin UI page contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminPageDecl {
    pub path: String,
    pub title: String,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

/// Dashboard widget size.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WidgetSize {
    Small,
    Medium,
    Large,
    Full,
}

/// A dashboard widget contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDecl {
    pub id: String,
    pub title: String,
    pub component: String,
    pub size: WidgetSize,
}

/// Typed plugin manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
    pub category: PluginCategory,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub routes: Vec<RouteDecl>,
    #[serde(default)]
    pub admin_pages: Vec<AdminPageDecl>,
    #[serde(default)]
    pub dashboard_widgets: Vec<WidgetDecl>,
    #[serde(default)]
    pub hooks: Vec<HookDecl>,
    #[serde(default = "default_main")]
    pub main: String,
    /// Initial configuration applied when nothing is persisted yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_config: Option<serde_json::Value>,
}

fn default_main() -> String {
    DEFAULT_MAIN.to_string()
}

impl PluginManifest {
    /// Risk level derived from requested permissions.
    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::of(&self.permissions)
    }

    /// Normalized keys of every declared route, in declaration order.
    pub fn route_keys(&self) -> Vec<RouteKey> {
        self.routes.iter().map(RouteDecl::key).collect()
    }

    /// Returns true if this manifest declares the given route.
    pub fn declares_route(&self, key: &RouteKey) -> bool {
        self.routes.iter().any(|r| &r.key() == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_json() -> serde_json::Value {
        serde_json::json!({
            "id": "hello-world",
            "name": "Hello World",
            "version": "1.0.0",
            "category": "utility",
            "permissions": ["read:content"],
            "routes": [
                {"method": "get", "path": "/hello/", "handler": "routes/hello.wasm",
                 "rateLimit": {"max": 3, "windowMs": 60000}}
            ],
            "dashboardWidgets": [
                {"id": "greeting", "title": "Greeting", "component": "widgets/greeting.js", "size": "small"}
            ],
            "hooks": [{"name": "request-start", "handler": "hooks/log.wasm", "priority": 5}]
        })
    }

    #[test]
    fn manifest_deserializes_camel_case() {
        let manifest: PluginManifest = serde_json::from_value(hello_json()).unwrap();
        assert_eq!(manifest.id, "hello-world");
        assert_eq!(manifest.category, PluginCategory::Utility);
        assert_eq!(manifest.main, DEFAULT_MAIN);
        assert_eq!(manifest.routes[0].method, HttpMethod::Get);
        assert_eq!(
            manifest.routes[0].rate_limit,
            Some(RateLimitDecl {
                max: 3,
                window_ms: 60_000
            })
        );
        assert_eq!(manifest.dashboard_widgets[0].size, WidgetSize::Small);
        assert_eq!(manifest.hooks[0].priority, Some(5));
    }

    #[test]
    fn route_keys_are_normalized() {
        let manifest: PluginManifest = serde_json::from_value(hello_json()).unwrap();
        let keys = manifest.route_keys();
        assert_eq!(keys, vec![RouteKey::new(HttpMethod::Get, "/hello")]);
        assert!(manifest.declares_route(&RouteKey::new(HttpMethod::Get, "/hello")));
        assert!(!manifest.declares_route(&RouteKey::new(HttpMethod::Post, "/hello")));
    }

    #[test]
    fn permission_strings_round_trip_through_strum() {
        for p in Permission::ALL {
            let parsed: Permission = p.to_string().parse().unwrap();
            assert_eq!(parsed, p);
        }
        assert!("root:everything".parse::<Permission>().is_err());
    }

    #[test]
    fn risk_level_takes_highest_permission() {
        assert_eq!(RiskLevel::of(&[]), RiskLevel::Low);
        assert_eq!(
            RiskLevel::of(&[Permission::ReadContent, Permission::EmailSend]),
            RiskLevel::Medium
        );
        assert_eq!(
            RiskLevel::of(&[Permission::ReadContent, Permission::AdminAccess]),
            RiskLevel::High
        );
        assert_eq!(
            RiskLevel::of(&[Permission::DatabaseWrite]),
            RiskLevel::High
        );
    }
}
