//! Sync core error types

use crate::gate::WorkerFailure;
use crate::model::Scope;
use crate::poller::PollOutcome;
use cloudmirror_cloud::{CloudError, ResourceType};
use std::time::Duration;
use thiserror::Error;

/// Sync core errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Provider(#[from] CloudError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Polling timed out with {} target(s) unresolved", outcome.unknown_ids.len())]
    PollTimeout { outcome: PollOutcome },

    #[error("Polling cancelled with {} target(s) unresolved", outcome.unknown_ids.len())]
    PollCancelled { outcome: PollOutcome },

    #[error("Polling aborted: {source}")]
    PollAborted {
        outcome: PollOutcome,
        #[source]
        source: CloudError,
    },

    #[error("Sync already running for {0}")]
    AlreadySyncing(Scope),

    #[error("Sync of {scope} is frequency limited, retry after {retry_after:?}")]
    FrequencyLimited { scope: Scope, retry_after: Duration },

    #[error("Listing of {scope} is incomplete: {reason}")]
    ListingIncomplete { scope: Scope, reason: String },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("{failed_pages} page(s) of {resource_type} failed ({affected} resources affected): {first}")]
    Aggregate {
        resource_type: ResourceType,
        failed_pages: usize,
        affected: usize,
        first: Box<SyncError>,
    },

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error category, independent of where the error was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParameter,
    ProviderTransient,
    ProviderFatal,
    PartialFailed,
    Timeout,
    Cancelled,
    AlreadySyncing,
    FrequencyLimited,
    ListingIncomplete,
    Aggregate,
    Store,
    Internal,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            SyncError::Provider(e) => match e {
                CloudError::InvalidParameter(_) => ErrorKind::InvalidParameter,
                CloudError::ProviderTransient(_) => ErrorKind::ProviderTransient,
                CloudError::PartialFailed { .. } => ErrorKind::PartialFailed,
                _ => ErrorKind::ProviderFatal,
            },
            SyncError::PollAborted { .. } => ErrorKind::ProviderFatal,
            SyncError::Store(_) | SyncError::Io(_) | SyncError::Json(_) => ErrorKind::Store,
            SyncError::PollTimeout { .. } => ErrorKind::Timeout,
            SyncError::PollCancelled { .. } | SyncError::Cancelled(_) => ErrorKind::Cancelled,
            SyncError::AlreadySyncing(_) => ErrorKind::AlreadySyncing,
            SyncError::FrequencyLimited { .. } => ErrorKind::FrequencyLimited,
            SyncError::ListingIncomplete { .. } => ErrorKind::ListingIncomplete,
            SyncError::Aggregate { .. } => ErrorKind::Aggregate,
            SyncError::Worker(_) => ErrorKind::Internal,
        }
    }

    /// Partial poll outcome carried by poll errors
    pub fn outcome(&self) -> Option<&PollOutcome> {
        match self {
            SyncError::PollTimeout { outcome }
            | SyncError::PollCancelled { outcome }
            | SyncError::PollAborted { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Provider(e) if e.is_transient())
    }
}

impl From<WorkerFailure> for SyncError {
    fn from(e: WorkerFailure) -> Self {
        SyncError::Worker(e.0)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            SyncError::from(CloudError::ProviderTransient("throttled".into())).kind(),
            ErrorKind::ProviderTransient
        );
        assert_eq!(
            SyncError::from(CloudError::NotFound("ins-1".into())).kind(),
            ErrorKind::ProviderFatal
        );
        assert_eq!(
            SyncError::PollTimeout {
                outcome: PollOutcome::default()
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(SyncError::Cancelled("shutdown".into()).kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_outcome_attached_to_poll_errors() {
        let mut outcome = PollOutcome::default();
        outcome.success_ids.insert("ins-1".into());
        outcome.unknown_ids.insert("ins-2".into());

        let err = SyncError::PollTimeout { outcome };
        assert_eq!(err.to_string(), "Polling timed out with 1 target(s) unresolved");
        assert!(err.outcome().is_some_and(|o| o.success_ids.contains("ins-1")));
        assert!(SyncError::Store("disk full".into()).outcome().is_none());
    }

    #[test]
    fn test_aggregate_display() {
        let err = SyncError::Aggregate {
            resource_type: ResourceType::Cvm,
            failed_pages: 2,
            affected: 200,
            first: Box::new(SyncError::Store("write failed".into())),
        };
        assert_eq!(
            err.to_string(),
            "2 page(s) of cvm failed (200 resources affected): Store error: write failed"
        );
    }
}
