//! Snapshot provider error types

use cloudmirror_cloud::CloudError;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Account not found in snapshot: {0}")]
    AccountNotFound(String),

    #[error("Invalid page token: {0}")]
    InvalidToken(String),

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SnapshotError> for CloudError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::InvalidToken(_) => CloudError::InvalidParameter(e.to_string()),
            SnapshotError::AccountNotFound(_) => CloudError::PermissionDenied(e.to_string()),
            SnapshotError::RootNotFound(_) => CloudError::NotFound(e.to_string()),
            SnapshotError::Io(ref io)
                if matches!(
                    io.kind(),
                    ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                ) =>
            {
                CloudError::ProviderTransient(e.to_string())
            }
            other => CloudError::ProviderFatal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_error_mapping() {
        let transient: CloudError =
            SnapshotError::Io(std::io::Error::new(ErrorKind::Interrupted, "signal")).into();
        assert!(transient.is_transient());

        let fatal: CloudError =
            SnapshotError::Io(std::io::Error::new(ErrorKind::PermissionDenied, "denied")).into();
        assert!(matches!(fatal, CloudError::ProviderFatal(_)));

        let token: CloudError = SnapshotError::InvalidToken("tok-x".into()).into();
        assert!(matches!(token, CloudError::InvalidParameter(_)));
    }
}
