// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Enumerated hook names.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use plinth_core::manifest::HookKind;

/// Extension point name.
///
/// Built-in names carry a fixed [`HookKind`]. Any other string parses to
/// `Custom`, whose kind is declared by whoever registers it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HookName {
    RequestStart,
    RequestEnd,
    ResponseFilter,
    Error,
    BeforeInstall,
    AfterInstall,
    BeforeActivate,
    AfterActivate,
    BeforeDeactivate,
    AfterDeactivate,
    BeforeUninstall,
    AfterUninstall,
    Custom(String),
}

impl HookName {
    /// Every built-in name.
    pub const BUILT_IN: [HookName; 12] = [
        HookName::RequestStart,
        HookName::RequestEnd,
        HookName::ResponseFilter,
        HookName::Error,
        HookName::BeforeInstall,
        HookName::AfterInstall,
        HookName::BeforeActivate,
        HookName::AfterActivate,
        HookName::BeforeDeactivate,
        HookName::AfterDeactivate,
        HookName::BeforeUninstall,
        HookName::AfterUninstall,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            HookName::RequestStart => "request-start",
            HookName::RequestEnd => "request-end",
            HookName::ResponseFilter => "response-filter",
            HookName::Error => "error",
            HookName::BeforeInstall => "before-install",
            HookName::AfterInstall => "after-install",
            HookName::BeforeActivate => "before-activate",
            HookName::AfterActivate => "after-activate",
            HookName::BeforeDeactivate => "before-deactivate",
            HookName::AfterDeactivate => "after-deactivate",
            HookName::BeforeUninstall => "before-uninstall",
            HookName::AfterUninstall => "after-uninstall",
            HookName::Custom(name) => name,
        }
    }

    /// Kind fixed by a built-in name, `None` for custom names.
    pub fn builtin_kind(&self) -> Option<HookKind> {
        match self {
            HookName::ResponseFilter => Some(HookKind::Filter),
            HookName::Custom(_) => None,
            _ => Some(HookKind::Action),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, HookName::Custom(_))
    }
}

impl FromStr for HookName {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let builtin = HookName::BUILT_IN.iter().find(|h| h.as_str() == s);
        Ok(match builtin {
            Some(h) => h.clone(),
            None => HookName::Custom(s.to_string()),
        })
    }
}

impl From<String> for HookName {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(name) => name,
            Err(never) => match never {},
        }
    }
}

impl From<HookName> for String {
    fn from(name: HookName) -> Self {
        name.as_str().to_string()
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
