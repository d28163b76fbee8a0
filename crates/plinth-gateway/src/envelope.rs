// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Standard JSON envelope returned by every Plinth HTTP response.

use serde::Serialize;
use serde_json::Value;

use plinth_core::PlinthError;

/// `{success, data?, error?, message?, errors?, kind?, statusCode}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Field-level validation errors.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    pub status_code: u16,
}

impl Envelope {
    pub fn ok(data: Value, status_code: u16) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
            errors: Vec::new(),
            kind: None,
            status_code,
        }
    }

    /// Successful lifecycle operation summary.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            message: Some(message.into()),
            errors: Vec::new(),
            kind: None,
            status_code: 200,
        }
    }

    pub fn from_error(err: &PlinthError) -> Self {
        let errors = match err {
            PlinthError::Validation { errors } => errors.clone(),
            _ => Vec::new(),
        };
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            message: None,
            errors,
            kind: Some(err.kind()),
            status_code: err.status_code(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "success": self.success, "statusCode": self.status_code })
        })
    }
}
