//! Common error types for OmniStore.

use thiserror::Error;

/// Top-level error type for storage and archive operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The named object does not exist where existence was required.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other substrate failure (network, auth, quota, malformed request).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed archive or failure while materializing its entries.
    #[error("Archive error: {0}")]
    Archive(String),

    /// A conditional write lost against a concurrent writer.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backend does not implement this capability.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Credentials were rejected or could not be refreshed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is the not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether this error is a lost optimistic-concurrency precondition.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinguishable() {
        assert!(Error::NotFound("a".to_string()).is_not_found());
        assert!(!Error::Storage("a".to_string()).is_not_found());
        assert!(!Error::Io(std::io::Error::other("boom")).is_not_found());
    }

    #[test]
    fn test_conflict_helper() {
        assert!(Error::Conflict("generation mismatch".to_string()).is_conflict());
        assert!(!Error::NotFound("a".to_string()).is_conflict());
    }
}
