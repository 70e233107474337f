//! Error Types
//!
//! Every fallible operation in the core returns [`AceflowResult`]. The
//! request/response layer maps each error onto one of the five contract
//! kinds via [`AceflowError::kind`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core Result type alias
pub type AceflowResult<T> = Result<T, AceflowError>;

/// Core errors
#[derive(Debug, Error)]
pub enum AceflowError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// Malformed input or illegal transition
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Unknown project, memory, or gate
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// Existing state or concurrent mutation collision
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Embedder could not produce a vector
    #[error("embedding unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    /// Save/load failure that is not a database or IO error
    #[error("persistence error: {message}")]
    Persistence { message: String },

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database mutex poisoned by a panicking writer
    #[error("database lock poisoned")]
    LockPoisoned,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Error kinds exposed through the request/response contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    NotFoundError,
    ConflictError,
    EmbeddingUnavailableError,
    PersistenceError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "ValidationError",
            Self::NotFoundError => "NotFoundError",
            Self::ConflictError => "ConflictError",
            Self::EmbeddingUnavailableError => "EmbeddingUnavailableError",
            Self::PersistenceError => "PersistenceError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AceflowError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create an embedding unavailable error
    pub fn embedding_unavailable(message: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable {
            message: message.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Contract kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Validation { .. } | Self::Yaml(_) => ErrorKind::ValidationError,
            Self::NotFound { .. } => ErrorKind::NotFoundError,
            Self::Conflict { .. } => ErrorKind::ConflictError,
            Self::EmbeddingUnavailable { .. } => ErrorKind::EmbeddingUnavailableError,
            Self::Persistence { .. }
            | Self::Database(_)
            | Self::LockPoisoned
            | Self::Io(_)
            | Self::Serialization(_) => ErrorKind::PersistenceError,
        }
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the retry policy should try the operation again
    ///
    /// Only transient failures qualify: SQLite busy, locked and I/O errors,
    /// filesystem errors and failed saves. Constraint violations and
    /// serialization errors fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e.sqlite_error_code(),
                Some(
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::SystemIoFailure
                )
            ),
            Self::Io(_) | Self::Persistence { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = AceflowError::validation("bad stage");
        assert!(err.to_string().contains("bad stage"));
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let err = AceflowError::not_found("Project", "demo");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Project"));
        assert!(err.to_string().contains("demo"));

        let err = AceflowError::conflict("already initialized");
        assert_eq!(err.kind(), ErrorKind::ConflictError);
    }

    #[test]
    fn test_persistence_kinds_are_retryable() {
        let io = AceflowError::from(std::io::Error::other("disk full"));
        assert_eq!(io.kind(), ErrorKind::PersistenceError);
        assert!(io.is_retryable());

        assert!(!AceflowError::LockPoisoned.is_retryable());
        assert!(!AceflowError::validation("x").is_retryable());
    }

    fn sqlite_failure(code: std::os::raw::c_int) -> AceflowError {
        AceflowError::from(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[test]
    fn test_only_transient_database_errors_are_retryable() {
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_BUSY).is_retryable());
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_LOCKED).is_retryable());

        let constraint = sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT);
        assert_eq!(constraint.kind(), ErrorKind::PersistenceError);
        assert!(!constraint.is_retryable());
        assert!(!AceflowError::from(rusqlite::Error::QueryReturnedNoRows).is_retryable());

        let serialization = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(!AceflowError::from(serialization).is_retryable());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::NotFoundError.to_string(), "NotFoundError");
        assert_eq!(
            serde_json::to_value(ErrorKind::ConflictError).unwrap(),
            serde_json::json!("ConflictError")
        );
    }
}
