//! Validation Utilities

use crate::{AceflowError, AceflowResult};

/// Validate a project ID
///
/// Valid IDs are 1-128 characters of ASCII alphanumerics, `-`, `_` and `.`,
/// and never a path component such as `.` or `..`. Project IDs become state
/// file names, so anything else is rejected.
pub fn validate_project_id(id: &str) -> AceflowResult<()> {
    if id.is_empty() {
        return Err(AceflowError::validation("project_id cannot be empty"));
    }

    if id.len() > 128 {
        return Err(AceflowError::validation(
            "project_id must be 128 characters or less",
        ));
    }

    if id == "." || id == ".." {
        return Err(AceflowError::validation(format!(
            "project_id '{}' is not allowed",
            id
        )));
    }

    for (i, c) in id.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(AceflowError::validation(format!(
                "invalid character '{}' at position {} in project_id",
                c, i
            )));
        }
    }

    Ok(())
}

/// Validate that a named value is a finite number in `[0, 1]`
pub fn validate_unit_interval(field: &str, value: f64) -> AceflowResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AceflowError::validation(format!(
            "{} must be between 0 and 1, got {}",
            field, value
        )))
    }
}
