//! Authorization verdicts.
//!
//! A verdict is an ordinary return value: denials are never raised as errors by
//! the policy engine. Callers translate [`VerdictCode`] into their transport's
//! status codes.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictCode {
    Ok,
    Forbidden,
    NotFound,
    Conflict,
}

impl VerdictCode {
    /// HTTP-style status for this outcome.
    pub fn http_status(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
        }
    }
}

/// Allow/deny decision with a reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub allowed: bool,
    pub code: VerdictCode,
    pub reason: String,
}

impl Verdict {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            code: VerdictCode::Ok,
            reason: reason.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::deny(VerdictCode::Forbidden, reason)
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::deny(VerdictCode::NotFound, reason)
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::deny(VerdictCode::Conflict, reason)
    }

    fn deny(code: VerdictCode, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            code,
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.reason)
    }
}
