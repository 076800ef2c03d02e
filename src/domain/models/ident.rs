//! Path-safe identifier validation.
//!
//! Every identifier that participates in a constructed filesystem path
//! (task id, run id, wave id) is validated here before it ever reaches a
//! `PathBuf`. This is a security boundary, not a style preference: an
//! unchecked id containing `..` or a path separator could escape the state
//! directory or the sandbox root.

use crate::domain::errors::OrchestratorError;

/// Validate an identifier destined to become a path segment.
///
/// Rejects empty strings, control characters, path separators (`/`, `\`),
/// and any component equal to or containing `..`.
pub fn validate_path_safe_id(kind: &'static str, id: &str) -> Result<(), OrchestratorError> {
    if id.is_empty() {
        return Err(OrchestratorError::InvalidIdentifier {
            kind,
            value: id.to_string(),
            reason: "must not be empty",
        });
    }
    if id.contains('/') || id.contains('\\') {
        return Err(OrchestratorError::InvalidIdentifier {
            kind,
            value: id.to_string(),
            reason: "must not contain a path separator",
        });
    }
    if id.contains("..") {
        return Err(OrchestratorError::InvalidIdentifier {
            kind,
            value: id.to_string(),
            reason: "must not contain '..'",
        });
    }
    if id.chars().any(char::is_control) {
        return Err(OrchestratorError::InvalidIdentifier {
            kind,
            value: id.to_string(),
            reason: "must not contain control characters",
        });
    }
    Ok(())
}
