//! Centralized error types for Parley.
//!
//! Uses `thiserror` for ergonomic error definitions. Every variant maps onto an
//! HTTP-style status so a request layer can translate it without matching on
//! internals.

use crate::verdict::Verdict;

/// Core application error type used across all Parley crates.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    // === Authorization ===
    #[error("Denied ({0})")]
    Denied(Verdict),

    // === Resource errors ===
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    // === Validation errors ===
    #[error("Validation failed: {message}")]
    Validation { message: String },

    // === Capacity ===
    #[error("Limit reached: {message}")]
    LimitReached { message: String },

    // === Infrastructure errors ===
    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    /// A failed write could not be compensated; role levels need repair.
    #[error("Storage left inconsistent: {0}")]
    Inconsistent(#[source] anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ParleyError {
    /// Map error to an HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Denied(verdict) => verdict.code.http_status(),
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Validation { .. } => 400,
            Self::LimitReached { .. } => 403,
            Self::Storage(_) | Self::Inconsistent(_) | Self::Config(_) | Self::Internal(_) => 500,
        }
    }

    /// Error code string for programmatic handling by clients.
    pub fn error_code(&self) -> &str {
        match self {
            Self::Denied(_) => "DENIED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::LimitReached { .. } => "LIMIT_REACHED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Inconsistent(_) => "STORAGE_INCONSISTENT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show a client. Infrastructure details are logged, not returned.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(e) | Self::Inconsistent(e) | Self::Internal(e) => {
                tracing::error!("{}: {e:#}", self.error_code());
                "An internal error occurred".to_string()
            }
            Self::Config(e) => {
                tracing::error!("Configuration error: {e}");
                "An internal error occurred".to_string()
            }
            Self::Denied(verdict) => verdict.reason.clone(),
            other => other.to_string(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }
}

/// Convenience type alias for Results using ParleyError.
pub type ParleyResult<T> = Result<T, ParleyError>;
