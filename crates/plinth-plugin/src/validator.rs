// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Manifest and package validation.
//!
//! Validation works on the raw JSON so every problem can be reported with
//! the field it concerns, instead of stopping at the first serde error.
//! Malformed input always produces a report; only I/O failures reading the
//! archive are returned as errors.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use plinth_core::manifest::{HookKind, Permission, PluginCategory, RiskLevel, WidgetSize};
use plinth_core::{HttpMethod, PlinthError, PluginManifest, RouteKey};
use plinth_hooks::HookName;

use crate::package::{self, PackageLimits, UnpackError};

/// Outcome of validating a package or manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub risk_level: RiskLevel,
    /// Typed manifest, present when the report is valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PluginManifest>,
}

impl ValidationReport {
    fn invalid(error: String) -> Self {
        Self {
            is_valid: false,
            errors: vec![error],
            warnings: Vec::new(),
            risk_level: RiskLevel::Low,
            manifest: None,
        }
    }
}

/// Validates a package archive.
pub async fn validate(
    archive: &Path,
    limits: PackageLimits,
) -> Result<ValidationReport, PlinthError> {
    let scratch = tempfile::tempdir()?;
    match package::unpack_archive(archive, scratch.path(), limits).await {
        Ok(root) => Ok(validate_dir(&root, limits)?),
        Err(UnpackError::Io(e)) => Err(PlinthError::Io(e)),
        Err(UnpackError::Malformed(msg)) => Ok(ValidationReport::invalid(msg)),
    }
}

/// Validates an already unpacked plugin root.
pub fn validate_dir(root: &Path, limits: PackageLimits) -> std::io::Result<ValidationReport> {
    match package::read_manifest_value(root, limits.max_manifest_bytes) {
        Ok(Ok(value)) => Ok(validate_manifest(&value, Some(root))),
        Ok(Err(msg)) => Ok(ValidationReport::invalid(msg)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ValidationReport::invalid(
            format!("missing {}", plinth_core::manifest::MANIFEST_FILE),
        )),
        Err(e) => Err(e),
    }
}

/// Validates a manifest value. When `root` is given, referenced files are
/// checked for presence.
pub fn validate_manifest(value: &Value, root: Option<&Path>) -> ValidationReport {
    let mut v = Checker::default();

    let Some(obj) = value.as_object() else {
        return ValidationReport::invalid("manifest must be a JSON object".to_string());
    };

    if let Some(id) = v.required_str(obj, "id", "id")
        && !valid_plugin_id(id)
    {
        v.error(format!(
            "field 'id' must be 2-64 characters of [a-z0-9_-] starting with a letter or digit, got '{id}'"
        ));
    }
    v.required_str(obj, "name", "name");
    if let Some(version) = v.required_str(obj, "version", "version")
        && let Err(e) = semver::Version::parse(version)
    {
        v.error(format!(
            "field 'version' must be a semantic version, got '{version}': {e}"
        ));
    }
    if let Some(category) = v.required_str(obj, "category", "category")
        && category.parse::<PluginCategory>().is_err()
    {
        v.error(format!("field 'category' has unknown value '{category}'"));
    }
    for optional in ["description", "author", "license"] {
        if obj.get(optional).and_then(Value::as_str).is_none_or(str::is_empty) {
            v.warn(format!("field '{optional}' is missing"));
        }
    }

    let permissions = v.check_permissions(obj);
    v.check_routes(obj, root);
    v.check_hooks(obj);
    v.check_admin_pages(obj);
    v.check_widgets(obj);
    v.check_main(obj, root);

    let risk_level = RiskLevel::of(&permissions);
    let mut manifest = None;
    if v.errors.is_empty() {
        match serde_json::from_value::<PluginManifest>(value.clone()) {
            Ok(m) => manifest = Some(m),
            Err(e) => v.error(format!("manifest does not match schema: {e}")),
        }
    }

    ValidationReport {
        is_valid: v.errors.is_empty(),
        errors: v.errors,
        warnings: v.warnings,
        risk_level,
        manifest,
    }
}

pub(crate) fn valid_plugin_id(id: &str) -> bool {
    (2..=64).contains(&id.len())
        && id
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[derive(Default)]
struct Checker {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Checker {
    fn error(&mut self, msg: String) {
        self.errors.push(msg);
    }

    fn warn(&mut self, msg: String) {
        self.warnings.push(msg);
    }

    /// Requires a non-empty string field; `label` is the path used in messages.
    fn required_str<'a>(
        &mut self,
        obj: &'a Map<String, Value>,
        key: &str,
        label: &str,
    ) -> Option<&'a str> {
        match obj.get(key) {
            None | Some(Value::Null) => {
                self.error(format!("missing required field '{label}'"));
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                self.error(format!("field '{label}' must not be empty"));
                None
            }
            Some(Value::String(s)) => Some(s),
            Some(_) => {
                self.error(format!("field '{label}' must be a string"));
                None
            }
        }
    }

    /// Returns the array under `key`, empty when absent.
    fn array<'a>(&mut self, obj: &'a Map<String, Value>, key: &str) -> &'a [Value] {
        match obj.get(key) {
            None | Some(Value::Null) => &[],
            Some(Value::Array(items)) => items,
            Some(_) => {
                self.error(format!("field '{key}' must be an array"));
                &[]
            }
        }
    }

    fn items<'a>(
        &mut self,
        obj: &'a Map<String, Value>,
        key: &str,
    ) -> Vec<(String, &'a Map<String, Value>)> {
        let mut out = Vec::new();
        for (i, item) in self.array(obj, key).iter().enumerate() {
            let label = format!("{key}[{i}]");
            match item.as_object() {
                Some(o) => out.push((label, o)),
                None => self.error(format!("'{label}' must be an object")),
            }
        }
        out
    }

    fn string_list(&mut self, obj: &Map<String, Value>, key: &str, label: &str) {
        match obj.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
            Some(_) => self.error(format!("'{label}.{key}' must be an array of strings")),
        }
    }

    fn module_ref(&mut self, reference: &str, label: &str, root: Option<&Path>) {
        let (path, _) = package::split_reference(reference);
        let base = root.unwrap_or(Path::new("."));
        if package::resolve_within(base, path).is_none() {
            self.error(format!(
                "'{label}' references '{reference}', which is outside the plugin root"
            ));
        }
    }

    fn check_permissions(&mut self, obj: &Map<String, Value>) -> Vec<Permission> {
        let mut valid = Vec::new();
        let mut seen = HashSet::new();
        for (i, item) in self.array(obj, "permissions").iter().enumerate() {
            let Some(raw) = item.as_str() else {
                self.error(format!("'permissions[{i}]' must be a string"));
                continue;
            };
            match raw.parse::<Permission>() {
                Ok(p) => {
                    if seen.insert(p) {
                        valid.push(p);
                    } else {
                        self.warn(format!("permission '{raw}' is listed more than once"));
                    }
                }
                Err(_) => self.error(format!("'permissions[{i}]' has unknown permission '{raw}'")),
            }
        }
        valid
    }

    fn check_routes(&mut self, obj: &Map<String, Value>, root: Option<&Path>) {
        let mut keys: HashSet<RouteKey> = HashSet::new();
        for (label, route) in self.items(obj, "routes") {
            let method = self
                .required_str(route, "method", &format!("{label}.method"))
                .and_then(|m| match m.parse::<HttpMethod>() {
                    Ok(method) => Some(method),
                    Err(_) => {
                        self.error(format!("'{label}.method' has unknown HTTP method '{m}'"));
                        None
                    }
                });
            let path = self
                .required_str(route, "path", &format!("{label}.path"))
                .and_then(|p| {
                    if p.starts_with('/') {
                        Some(p)
                    } else {
                        self.error(format!("'{label}.path' must start with '/', got '{p}'"));
                        None
                    }
                });
            if let Some(handler) = self.required_str(route, "handler", &format!("{label}.handler")) {
                self.module_ref(handler, &format!("{label}.handler"), root);
            }
            if let (Some(method), Some(path)) = (method, path) {
                let key = RouteKey::new(method, path);
                if !keys.insert(key.clone()) {
                    self.error(format!("'{label}' duplicates route {key}"));
                }
            }

            self.string_list(route, "permissions", &label);
            self.string_list(route, "middleware", &label);
            if let Some(names) = route.get("middleware").and_then(Value::as_array) {
                for name in names.iter().filter_map(Value::as_str) {
                    self.module_ref(name, &format!("{label}.middleware"), root);
                }
            }

            match route.get("rateLimit") {
                None | Some(Value::Null) => {}
                Some(Value::Object(limit)) => {
                    for field in ["max", "windowMs"] {
                        match limit.get(field).and_then(Value::as_u64) {
                            Some(n) if n > 0 => {}
                            _ => self.error(format!(
                                "'{label}.rateLimit.{field}' must be a positive integer"
                            )),
                        }
                    }
                }
                Some(_) => self.error(format!("'{label}.rateLimit' must be an object")),
            }

            match route.get("validation") {
                None | Some(Value::Null) => {}
                Some(Value::Object(schema)) => {
                    let label = format!("{label}.validation");
                    self.string_list(schema, "query", &label);
                    self.string_list(schema, "body", &label);
                }
                Some(_) => self.error(format!("'{label}.validation' must be an object")),
            }
        }
    }

    fn check_hooks(&mut self, obj: &Map<String, Value>) {
        for (label, hook) in self.items(obj, "hooks") {
            let name = self.required_str(hook, "name", &format!("{label}.name"));
            if let Some(handler) = self.required_str(hook, "handler", &format!("{label}.handler")) {
                self.module_ref(handler, &format!("{label}.handler"), None);
            }
            if let Some(priority) = hook.get("priority")
                && !priority.is_null()
                && priority.as_i64().is_none_or(|p| i32::try_from(p).is_err())
            {
                self.error(format!("'{label}.priority' must be an integer"));
            }
            let kind = match hook.get("kind").and_then(Value::as_str) {
                Some(k) => match k.parse::<HookKind>() {
                    Ok(kind) => Some(kind),
                    Err(_) => {
                        self.error(format!("'{label}.kind' must be 'action' or 'filter'"));
                        None
                    }
                },
                None => None,
            };
            if let Some(name) = name {
                let hook_name: HookName = name.to_string().into();
                match (hook_name.builtin_kind(), kind) {
                    (Some(builtin), Some(declared)) if builtin != declared => {
                        self.error(format!(
                            "'{label}' declares kind '{declared}' but '{name}' is a {builtin} hook"
                        ));
                    }
                    (None, None) => self.warn(format!(
                        "'{label}' uses custom hook '{name}' without a kind, treating it as an action"
                    )),
                    _ => {}
                }
            }
        }
    }

    fn check_admin_pages(&mut self, obj: &Map<String, Value>) {
        for (label, page) in self.items(obj, "adminPages") {
            if let Some(path) = self.required_str(page, "path", &format!("{label}.path"))
                && !path.starts_with('/')
            {
                self.error(format!("'{label}.path' must start with '/', got '{path}'"));
            }
            self.required_str(page, "title", &format!("{label}.title"));
            if let Some(component) =
                self.required_str(page, "component", &format!("{label}.component"))
            {
                self.module_ref(component, &format!("{label}.component"), None);
            }
        }
    }

    fn check_widgets(&mut self, obj: &Map<String, Value>) {
        let mut ids = HashSet::new();
        for (label, widget) in self.items(obj, "dashboardWidgets") {
            if let Some(id) = self.required_str(widget, "id", &format!("{label}.id"))
                && !ids.insert(id.to_string())
            {
                self.error(format!("'{label}.id' duplicates widget '{id}'"));
            }
            self.required_str(widget, "title", &format!("{label}.title"));
            if let Some(component) =
                self.required_str(widget, "component", &format!("{label}.component"))
            {
                self.module_ref(component, &format!("{label}.component"), None);
            }
            if let Some(size) = self.required_str(widget, "size", &format!("{label}.size"))
                && size.parse::<WidgetSize>().is_err()
            {
                self.error(format!(
                    "'{label}.size' must be one of small, medium, large, full, got '{size}'"
                ));
            }
        }
    }

    fn check_main(&mut self, obj: &Map<String, Value>, root: Option<&Path>) {
        let main = match obj.get("main") {
            None | Some(Value::Null) => plinth_core::manifest::DEFAULT_MAIN,
            Some(Value::String(s)) if !s.is_empty() => s.as_str(),
            Some(_) => {
                self.error("field 'main' must be a non-empty string".to_string());
                return;
            }
        };
        self.module_ref(main, "main", root);
        if let Some(root) = root
            && let Some(path) = package::resolve_within(root, package::split_reference(main).0)
            && !path.is_file()
        {
            self.warn(format!(
                "main entry '{main}' is not in the package and must be provided by a compiled-in module"
            ));
        }
    }
}
