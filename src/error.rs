//! Unified error model for the scan → build → execute → pivot pipeline.
//! Every variant carries the offending identifier or value alongside a human
//! readable message so callers can point at the exact field that was rejected.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FusionError {
    #[error("scan error ({offending}): {message}")]
    Scan { offending: String, message: String },
    #[error("configuration error ({offending}): {message}")]
    Configuration { offending: String, message: String },
    #[error("unknown identifier '{offending}': {message}")]
    UnknownIdentifier { offending: String, message: String },
    #[error("path traversal rejected ({offending}): {message}")]
    PathTraversal { offending: String, message: String },
    #[error("identifier rejected '{offending}': {message}")]
    RejectedIdentifier { offending: String, message: String },
    #[error("empty selection: {message}")]
    EmptySelection { offending: String, message: String },
    #[error("conflicting filter on {offending}: {message}")]
    ConflictingFilter { offending: String, message: String },
    #[error("query timed out after {offending}: {message}")]
    QueryTimeout { offending: String, message: String },
    #[error("execution error ({offending}): {message}")]
    Execution { offending: String, message: String },
    #[error("export error ({offending}): {message}")]
    Export { offending: String, message: String },
}

impl FusionError {
    pub fn kind(&self) -> &'static str {
        match self {
            FusionError::Scan { .. } => "scan",
            FusionError::Configuration { .. } => "configuration",
            FusionError::UnknownIdentifier { .. } => "unknown_identifier",
            FusionError::PathTraversal { .. } => "path_traversal",
            FusionError::RejectedIdentifier { .. } => "rejected_identifier",
            FusionError::EmptySelection { .. } => "empty_selection",
            FusionError::ConflictingFilter { .. } => "conflicting_filter",
            FusionError::QueryTimeout { .. } => "query_timeout",
            FusionError::Execution { .. } => "execution",
            FusionError::Export { .. } => "export",
        }
    }

    pub fn offending(&self) -> &str {
        match self {
            FusionError::Scan { offending, .. }
            | FusionError::Configuration { offending, .. }
            | FusionError::UnknownIdentifier { offending, .. }
            | FusionError::PathTraversal { offending, .. }
            | FusionError::RejectedIdentifier { offending, .. }
            | FusionError::EmptySelection { offending, .. }
            | FusionError::ConflictingFilter { offending, .. }
            | FusionError::QueryTimeout { offending, .. }
            | FusionError::Execution { offending, .. }
            | FusionError::Export { offending, .. } => offending.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            FusionError::Scan { message, .. }
            | FusionError::Configuration { message, .. }
            | FusionError::UnknownIdentifier { message, .. }
            | FusionError::PathTraversal { message, .. }
            | FusionError::RejectedIdentifier { message, .. }
            | FusionError::EmptySelection { message, .. }
            | FusionError::ConflictingFilter { message, .. }
            | FusionError::QueryTimeout { message, .. }
            | FusionError::Execution { message, .. }
            | FusionError::Export { message, .. } => message.as_str(),
        }
    }

    pub fn scan<S: Into<String>, M: Into<String>>(offending: S, msg: M) -> Self { FusionError::Scan { offending: offending.into(), message: msg.into() } }
    pub fn configuration<S: Into<String>, M: Into<String>>(offending: S, msg: M) -> Self { FusionError::Configuration { offending: offending.into(), message: msg.into() } }
    pub fn unknown_identifier<S: Into<String>, M: Into<String>>(offending: S, msg: M) -> Self { FusionError::UnknownIdentifier { offending: offending.into(), message: msg.into() } }
    pub fn path_traversal<S: Into<String>, M: Into<String>>(offending: S, msg: M) -> Self { FusionError::PathTraversal { offending: offending.into(), message: msg.into() } }
    pub fn rejected<S: Into<String>, M: Into<String>>(offending: S, msg: M) -> Self { FusionError::RejectedIdentifier { offending: offending.into(), message: msg.into() } }
    pub fn empty_selection<M: Into<String>>(msg: M) -> Self { FusionError::EmptySelection { offending: String::new(), message: msg.into() } }
    pub fn conflicting_filter<S: Into<String>, M: Into<String>>(offending: S, msg: M) -> Self { FusionError::ConflictingFilter { offending: offending.into(), message: msg.into() } }
    pub fn timeout<M: Into<String>>(timeout: std::time::Duration, msg: M) -> Self { FusionError::QueryTimeout { offending: format!("{}ms", timeout.as_millis()), message: msg.into() } }
    pub fn execution<S: Into<String>, M: Into<String>>(offending: S, msg: M) -> Self { FusionError::Execution { offending: offending.into(), message: msg.into() } }
    pub fn export<S: Into<String>, M: Into<String>>(offending: S, msg: M) -> Self { FusionError::Export { offending: offending.into(), message: msg.into() } }

    /// True for errors caused by caller input that should be corrected and resubmitted.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            FusionError::UnknownIdentifier { .. }
                | FusionError::RejectedIdentifier { .. }
                | FusionError::PathTraversal { .. }
                | FusionError::EmptySelection { .. }
                | FusionError::ConflictingFilter { .. }
        )
    }
}

pub type FusionResult<T> = Result<T, FusionError>;

impl From<duckdb::Error> for FusionError {
    fn from(err: duckdb::Error) -> Self {
        FusionError::Execution { offending: "duckdb".into(), message: err.to_string() }
    }
}
