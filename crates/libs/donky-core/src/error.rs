use donky_transport::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;

pub mod code {
    pub const VALIDATION_FAILED: &str = "DONKY_VALIDATION_FAILED";
    pub const TRANSPORT_FAILED: &str = "DONKY_TRANSPORT_FAILED";
    pub const STORAGE_FAILED: &str = "DONKY_STORAGE_FAILED";
    pub const CONFIGURATION_INVALID: &str = "DONKY_CONFIGURATION_INVALID";
    pub const MODULE_INITIALISATION_FAILED: &str = "DONKY_MODULE_INITIALISATION_FAILED";
    pub const INTERNAL: &str = "DONKY_INTERNAL_ERROR";
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
#[non_exhaustive]
pub enum ErrorCategory {
    Validation,
    Transport,
    Storage,
    Configuration,
    Internal,
}

pub type ErrorDetails = BTreeMap<String, JsonValue>;

/// Structured error surfaced to module-level callers.
///
/// Validation failures carry a `{field → reason}` map in `details`;
/// transport and storage failures are retryable and never abort future
/// cycles or queued tasks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Error)]
#[error("{machine_code}: {message}")]
#[non_exhaustive]
pub struct DonkyError {
    pub machine_code: String,
    pub category: ErrorCategory,
    pub retryable: bool,
    pub message: String,
    #[serde(default)]
    pub details: ErrorDetails,
}

impl DonkyError {
    pub fn new(
        machine_code: impl Into<String>,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            machine_code: machine_code.into(),
            category,
            retryable: false,
            message: message.into(),
            details: ErrorDetails::new(),
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Server-side field rejection, keyed by field name.
    pub fn validation_failed(failures: BTreeMap<String, String>) -> Self {
        let mut error = Self::new(
            code::VALIDATION_FAILED,
            ErrorCategory::Validation,
            "one or more submitted fields were rejected",
        );
        for (field, reason) in failures {
            error.details.insert(field, JsonValue::String(reason));
        }
        error
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(code::STORAGE_FAILED, ErrorCategory::Storage, message).with_retryable(true)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(code::INTERNAL, ErrorCategory::Internal, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(code::CONFIGURATION_INVALID, ErrorCategory::Configuration, message)
    }

    /// Fields the caller submitted that the server rejected, if this is a
    /// validation error.
    pub fn validation_failures(&self) -> Option<BTreeMap<String, String>> {
        if self.machine_code != code::VALIDATION_FAILED {
            return None;
        }
        Some(
            self.details
                .iter()
                .filter_map(|(field, reason)| {
                    reason.as_str().map(|reason| (field.clone(), reason.to_owned()))
                })
                .collect(),
        )
    }
}

impl From<TransportError> for DonkyError {
    fn from(err: TransportError) -> Self {
        Self::new(code::TRANSPORT_FAILED, ErrorCategory::Transport, err.to_string())
            .with_retryable(err.retryable())
    }
}

impl From<rusqlite::Error> for DonkyError {
    fn from(err: rusqlite::Error) -> Self {
        Self::storage(err.to_string())
    }
}
