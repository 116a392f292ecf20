//! Error types for the domain layer
//!
//! Three layers, each with its own enum:
//! - `ValidationError`: detected before any request is issued
//! - `BackendError`: what the transport observed
//! - `DomainError`: what the caller reports to the user

use thiserror::Error;

/// Client-side rule violations; no network call has been made
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is a required field")]
    MissingField(String),

    #[error(
        "A build for system \"{system_name}\" already exists in this release. \
         Each release can only have one build per system."
    )]
    DuplicateSystemInRelease {
        system_id: String,
        system_name: String,
        existing_build_id: String,
    },

    #[error("Cannot delete system \"{system_name}\" with subsystems ({}). Please delete subsystems first.", .children.join(", "))]
    HasChildren {
        system_id: String,
        system_name: String,
        children: Vec<String>,
    },

    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("Invalid date: '{0}' (expected YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("Invalid {field}: '{value}'")]
    InvalidValue { field: String, value: String },

    #[error("{0} cannot be changed after creation")]
    ImmutableField(String),
}

/// Failures reported by a backend implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{entity} not found")]
    NotFound { entity: String, id: String },

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors surfaced by the domain service
///
/// Every variant renders as a complete user-facing message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{context}: {message}")]
    Fetch { context: String, message: String },

    #[error("Session expired or invalid: {0}")]
    Auth(String),

    #[error("{context}: {message}")]
    ServerRejection {
        context: String,
        status: u16,
        message: String,
    },

    #[error("Another change is still in progress ({0}); wait for it to finish")]
    Busy(String),
}

impl DomainError {
    /// Wraps a backend failure with an operation-specific context
    pub fn from_backend(context: &str, err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized(message) => DomainError::Auth(message),
            BackendError::Network(message)
            | BackendError::Decode(message)
            | BackendError::Storage(message) => DomainError::Fetch {
                context: context.to_string(),
                message,
            },
            BackendError::Rejected { status, message } => DomainError::ServerRejection {
                context: context.to_string(),
                status,
                message,
            },
            err @ BackendError::NotFound { .. } => DomainError::ServerRejection {
                context: context.to_string(),
                status: 404,
                message: err.to_string(),
            },
        }
    }

    /// Transport failures can be retried from the view
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Fetch { .. })
    }

    /// The stored session must be torn down and the user sent to login
    pub fn requires_reauth(&self) -> bool {
        matches!(self, DomainError::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_is_prefixed_with_context() {
        let err = DomainError::from_backend(
            "Failed to save build",
            BackendError::Rejected {
                status: 400,
                message: "Release not found".into(),
            },
        );
        assert_eq!(err.to_string(), "Failed to save build: Release not found");
        assert!(!err.is_retryable());
        assert!(!err.requires_reauth());
    }

    #[test]
    fn test_unauthorized_is_not_a_validation_failure() {
        let err = DomainError::from_backend(
            "Failed to load builds",
            BackendError::Unauthorized("token expired".into()),
        );
        assert!(err.requires_reauth());
        assert!(!matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_network_failure_is_retryable() {
        let err = DomainError::from_backend(
            "Failed to load systems",
            BackendError::Network("connection refused".into()),
        );
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Failed to load systems: connection refused");
    }

    #[test]
    fn test_has_children_lists_children() {
        let err = ValidationError::HasChildren {
            system_id: "s1".into(),
            system_name: "Core".into(),
            children: vec!["Auth".into(), "Billing".into()],
        };
        assert_eq!(
            err.to_string(),
            "Cannot delete system \"Core\" with subsystems (Auth, Billing). Please delete subsystems first."
        );
    }
}
