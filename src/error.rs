//! Unified error model for the repository core.
//! One serde-friendly enum spans the whole taxonomy so boundary layers (HTTP,
//! WebDAV, admin tooling) can map categories without downcasting: not-found,
//! constraint violations (compile/evaluation-time rejects), fatal internal
//! consistency errors, authorization denials, and transient data-access
//! failures.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::path::UriError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepoError {
    /// Path or resource absent. Surfaced to the caller, never retried.
    NotFound { code: String, message: String },
    /// Request rejected at compile/evaluation time (mandatory property
    /// missing or deleted, malformed attribute specifier, bad sort key, …).
    Constraint { code: String, message: String },
    /// Internal consistency violation (nearest ACL missing, evaluator/schema
    /// mismatch). Indicates a bug in data or wiring; fatal, logged loudly.
    Consistency { code: String, message: String },
    /// Caller lacks the privilege the operation requires.
    Auth { code: String, message: String },
    /// Underlying store I/O failure. Eligible for caller-level retry; the core
    /// itself never retries.
    DataAccess { code: String, message: String },
}

impl RepoError {
    pub fn code_str(&self) -> &str {
        match self {
            RepoError::NotFound { code, .. }
            | RepoError::Constraint { code, .. }
            | RepoError::Consistency { code, .. }
            | RepoError::Auth { code, .. }
            | RepoError::DataAccess { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RepoError::NotFound { message, .. }
            | RepoError::Constraint { message, .. }
            | RepoError::Consistency { message, .. }
            | RepoError::Auth { message, .. }
            | RepoError::DataAccess { message, .. } => message.as_str(),
        }
    }

    pub fn not_found(code: impl Into<String>, msg: impl Into<String>) -> Self {
        RepoError::NotFound { code: code.into(), message: msg.into() }
    }
    pub fn constraint(code: impl Into<String>, msg: impl Into<String>) -> Self {
        RepoError::Constraint { code: code.into(), message: msg.into() }
    }
    pub fn consistency(code: impl Into<String>, msg: impl Into<String>) -> Self {
        RepoError::Consistency { code: code.into(), message: msg.into() }
    }
    pub fn auth(code: impl Into<String>, msg: impl Into<String>) -> Self {
        RepoError::Auth { code: code.into(), message: msg.into() }
    }
    pub fn data_access(code: impl Into<String>, msg: impl Into<String>) -> Self {
        RepoError::DataAccess { code: code.into(), message: msg.into() }
    }

    /// Convenience for the common "no resource at uri" case.
    pub fn resource_not_found(uri: &crate::path::Uri) -> Self {
        RepoError::not_found("resource_not_found", format!("no resource at {uri}"))
    }

    pub fn is_not_found(&self) -> bool { matches!(self, RepoError::NotFound { .. }) }
    pub fn is_constraint(&self) -> bool { matches!(self, RepoError::Constraint { .. }) }
    pub fn is_consistency(&self) -> bool { matches!(self, RepoError::Consistency { .. }) }
    pub fn is_auth(&self) -> bool { matches!(self, RepoError::Auth { .. }) }

    /// Whether a caller could reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool { matches!(self, RepoError::DataAccess { .. }) }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for RepoError {}

pub type RepoResult<T> = Result<T, RepoError>;

impl From<anyhow::Error> for RepoError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: internal plumbing failures surface as data access
        RepoError::DataAccess { code: "data_access".into(), message: err.to_string() }
    }
}

impl From<UriError> for RepoError {
    fn from(err: UriError) -> Self {
        RepoError::Constraint { code: "invalid_uri".into(), message: err.to_string() }
    }
}
