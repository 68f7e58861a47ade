//! Store error types.

use thiserror::Error;

/// Errors from session record persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record could not be serialized or written durably.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// I/O failure touching the store directory.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_persistence_display() {
        let err = StoreError::PersistenceFailure("disk full".into());
        assert_eq!(err.to_string(), "persistence failure: disk full");
    }

    #[test]
    fn error_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = StoreError::from(io);
        assert!(matches!(err, StoreError::Io(_)));
    }
}
