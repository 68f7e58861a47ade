//! Manifest error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from manifest loading and validation.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file does not exist.
    #[error("adapter manifest not found: {0}")]
    ConfigurationNotFound(PathBuf),

    /// The manifest exists but is not a valid adapter description.
    #[error("invalid adapter manifest: {0}")]
    ConfigurationInvalid(String),

    /// I/O failure reading a manifest.
    #[error("manifest I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_not_found_display() {
        let err = ManifestError::ConfigurationNotFound(PathBuf::from("/etc/adapters/lldb.json"));
        assert_eq!(
            err.to_string(),
            "adapter manifest not found: /etc/adapters/lldb.json"
        );
    }

    #[test]
    fn error_invalid_display() {
        let err = ManifestError::ConfigurationInvalid("identifier must not be empty".into());
        assert!(err.to_string().contains("identifier must not be empty"));
    }

    #[test]
    fn error_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ManifestError::from(io);
        assert!(matches!(err, ManifestError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }
}
