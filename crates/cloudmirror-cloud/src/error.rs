//! Cloud provider error types

use thiserror::Error;

/// Cloud provider errors
///
/// Providers map their SDK failures onto these variants. The sync core only
/// cares about the category: transient errors are retried by the provider
/// adapter (and tolerated by the poller), everything else is propagated.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Provider transient error: {0}")]
    ProviderTransient(String),

    #[error("Provider error: {0}")]
    ProviderFatal(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Partially failed after {} succeeded: {message}", success_ids.len())]
    PartialFailed {
        success_ids: Vec<String>,
        message: String,
    },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether the error is worth retrying (rate limit, timeout, throttling)
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::ProviderTransient(_))
    }

    /// IDs that were already applied before the failure, if any
    pub fn success_ids(&self) -> &[String] {
        match self {
            CloudError::PartialFailed { success_ids, .. } => success_ids,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CloudError::ProviderTransient("RequestLimitExceeded".into()).is_transient());
        assert!(!CloudError::ProviderFatal("boom".into()).is_transient());
        assert!(!CloudError::NotFound("ins-1".into()).is_transient());
    }

    #[test]
    fn test_partial_failed_keeps_success_ids() {
        let err = CloudError::PartialFailed {
            success_ids: vec!["sg-rule-1".into(), "sg-rule-2".into()],
            message: "quota exceeded".into(),
        };
        assert_eq!(err.success_ids(), ["sg-rule-1", "sg-rule-2"]);
        assert_eq!(
            err.to_string(),
            "Partially failed after 2 succeeded: quota exceeded"
        );
        assert!(CloudError::Unsupported("x".into()).success_ids().is_empty());
    }
}
