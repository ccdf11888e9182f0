//! Error types for deckhand operations

use thiserror::Error;

/// Result type alias for manager and phase operations
pub type Result<T> = std::result::Result<T, DeployError>;

/// Errors that can occur while deploying a customer
///
/// Every external call (subprocess, filesystem, template) is translated into
/// one of these variants at its call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployError {
    /// Required configuration missing or invalid, detected before any side effect
    #[error("Validation failed: {}", errors.join("; "))]
    Validation {
        /// Every missing or invalid field
        errors: Vec<String>,
    },

    /// External command exited with a non-zero status
    #[error("Command '{command}' failed (exit code {exit_code}): {stderr}")]
    ExternalCall {
        /// Rendered command line
        command: String,
        /// Process exit code, -1 when killed by a signal
        exit_code: i32,
        /// Captured stderr (or stdout when stderr was empty)
        stderr: String,
    },

    /// External command exceeded its time budget
    #[error("Command '{command}' timed out after {seconds}s")]
    Timeout {
        /// Rendered command line
        command: String,
        /// Budget that was exceeded
        seconds: u64,
    },

    /// Expected file, container, network or image is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Template could not be read or rendered
    #[error("Template error: {0}")]
    Template(String),
}

impl DeployError {
    /// Create a validation error from a list of messages
    pub fn validation(errors: Vec<String>) -> Self {
        Self::Validation { errors }
    }

    /// Create an I/O error with context about the path involved
    pub fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::Io(format!("{}: {}", context, err))
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Short machine-readable category name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::ExternalCall { .. } => "external_call",
            Self::Timeout { .. } => "timeout",
            Self::NotFound(_) => "not_found",
            Self::Io(_) => "io",
            Self::Template(_) => "template",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_every_error() {
        let err = DeployError::validation(vec![
            "Missing required parameter: host".to_string(),
            "Missing required parameter: project_path".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("host"));
        assert!(msg.contains("project_path"));
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_timeout_helpers() {
        let err = DeployError::Timeout {
            command: "docker pull nginx:alpine".to_string(),
            seconds: 300,
        };
        assert!(err.is_timeout());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("300s"));
    }
}
