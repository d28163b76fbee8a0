// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP method and normalized route keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// HTTP methods a plugin route may declare.
///
/// Parsing is case-insensitive so manifests may write `get` or `GET`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize,
    Deserialize,
)]
#[serde(try_from = "String", into = "String")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl TryFrom<String> for HttpMethod {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.to_string()
    }
}

/// Normalizes a request or manifest path for exact-match lookup.
///
/// Ensures a leading `/`, collapses repeated separators, and drops a
/// trailing `/` (except for the root path). No pattern matching is applied.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// `(method, normalized path)` pair identifying one live route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub method: HttpMethod,
    pub path: String,
}

impl RouteKey {
    pub fn new(method: HttpMethod, path: &str) -> Self {
        Self {
            method,
            path: normalize_path(path),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_handles_slashes() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("hello"), "/hello");
        assert_eq!(normalize_path("/hello/"), "/hello");
        assert_eq!(normalize_path("//a///b/"), "/a/b");
    }

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("DELETE".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
        assert!("BREW".parse::<HttpMethod>().is_err());
        assert_eq!(HttpMethod::Patch.to_string(), "PATCH");
    }

    #[test]
    fn method_serde_uses_uppercase_strings() {
        let json = serde_json::to_string(&HttpMethod::Post).unwrap();
        assert_eq!(json, "\"POST\"");
        let back: HttpMethod = serde_json::from_str("\"post\"").unwrap();
        assert_eq!(back, HttpMethod::Post);
    }

    proptest::proptest! {
        #[test]
        fn normalized_paths_are_canonical(path in "[a-z/]{0,24}") {
            let normalized = normalize_path(&path);
            proptest::prop_assert!(normalized.starts_with('/'));
            proptest::prop_assert!(!normalized.contains("//"));
            proptest::prop_assert!(normalized == "/" || !normalized.ends_with('/'));
            proptest::prop_assert_eq!(normalize_path(&normalized), normalized);
        }
    }

    #[test]
    fn route_key_display() {
        let key = RouteKey::new(HttpMethod::Get, "hello/");
        assert_eq!(key.to_string(), "GET /hello");
    }
}
