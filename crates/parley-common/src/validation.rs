//! Input validation utilities.
//!
//! Centralized validation helpers used by the authorization facade before any
//! policy or storage work happens.

use std::collections::HashSet;

use uuid::Uuid;
use validator::Validate;

use crate::error::ParleyError;

/// Validate a request body, returning a ParleyError::Validation on failure.
pub fn validate_request<T: Validate>(body: &T) -> Result<(), ParleyError> {
    body.validate().map_err(|e| ParleyError::Validation {
        message: format_validation_errors(e),
    })
}

/// Format validation errors into a human-readable string.
fn format_validation_errors(errors: validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for '{field}'"))
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate a role name against the configured maximum length.
pub fn validate_role_name(name: &str, max_len: u32) -> Result<(), ParleyError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ParleyError::Validation {
            message: "Role name cannot be empty or whitespace only".into(),
        });
    }

    if trimmed.chars().count() > max_len as usize {
        return Err(ParleyError::Validation {
            message: format!("Role name must be at most {max_len} characters"),
        });
    }

    if trimmed.chars().any(char::is_control) {
        return Err(ParleyError::Validation {
            message: "Role name cannot contain control characters".into(),
        });
    }

    Ok(())
}

/// Reject id lists that name the same role twice.
pub fn validate_unique_ids(ids: &[Uuid]) -> Result<(), ParleyError> {
    let mut seen = HashSet::with_capacity(ids.len());
    if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
        return Err(ParleyError::Validation {
            message: format!("Role {dup} is listed more than once"),
        });
    }
    Ok(())
}
