//! Operation types for asynchronous provider calls

use crate::error::{CloudError, Result};
use crate::resource::ResourceType;
use serde::{Deserialize, Serialize};

/// An operation submitted to a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Type of operation to perform
    pub kind: OperationKind,

    /// Resource type the operation targets
    pub resource_type: ResourceType,

    pub account_id: String,

    pub region: String,

    /// Target resources; empty for creations
    #[serde(default)]
    pub cloud_ids: Vec<String>,

    /// Vendor-specific request body
    #[serde(default)]
    pub params: serde_json::Value,

    /// Only validate the request, do not produce resources
    #[serde(default)]
    pub dry_run: bool,
}

impl Operation {
    pub fn new(
        kind: OperationKind,
        resource_type: ResourceType,
        account_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            resource_type,
            account_id: account_id.into(),
            region: region.into(),
            cloud_ids: Vec::new(),
            params: serde_json::Value::Null,
            dry_run: false,
        }
    }

    pub fn with_targets(mut self, cloud_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cloud_ids = cloud_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_id.is_empty() {
            return Err(CloudError::InvalidParameter("account_id is required".into()));
        }
        if self.region.is_empty() {
            return Err(CloudError::InvalidParameter("region is required".into()));
        }
        if self.kind != OperationKind::Create && self.cloud_ids.is_empty() {
            return Err(CloudError::InvalidParameter(format!(
                "{} operation requires at least one cloud id",
                self.kind
            )));
        }
        Ok(())
    }
}

/// Type of operation to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Start,
    Stop,
    Reboot,
    ResetPassword,
    Attach,
    Detach,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Start => write!(f, "start"),
            OperationKind::Stop => write!(f, "stop"),
            OperationKind::Reboot => write!(f, "reboot"),
            OperationKind::ResetPassword => write!(f, "reset-password"),
            OperationKind::Attach => write!(f, "attach"),
            OperationKind::Detach => write!(f, "detach"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Result of a batch operation
///
/// Uniform whether the provider applied the batch in one call or one item at
/// a time: the IDs that succeeded plus the first error, if any.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOperationResult {
    /// Resources the operation was applied to
    pub success_ids: Vec<String>,

    /// Resources the provider rejected
    #[serde(default)]
    pub failed_ids: Vec<String>,

    /// First error reported by the provider
    #[serde(default)]
    pub first_error: Option<String>,
}

impl BatchOperationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeeded(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            success_ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.first_error.is_none() && self.failed_ids.is_empty()
    }

    pub fn add_success(&mut self, id: impl Into<String>) {
        self.success_ids.push(id.into());
    }

    pub fn add_failure(&mut self, id: impl Into<String>, error: impl Into<String>) {
        self.failed_ids.push(id.into());
        if self.first_error.is_none() {
            self.first_error = Some(error.into());
        }
    }

    /// Success IDs, or `PartialFailed` carrying them when anything failed
    pub fn into_result(self) -> Result<Vec<String>> {
        match self.first_error {
            None if self.failed_ids.is_empty() => Ok(self.success_ids),
            first_error => Err(CloudError::PartialFailed {
                success_ids: self.success_ids,
                message: first_error.unwrap_or_else(|| {
                    format!("{} resources failed", self.failed_ids.len())
                }),
            }),
        }
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            succeeded: self.success_ids.len(),
            failed: self.failed_ids.len(),
        }
    }
}

/// Summary of a batch result
#[derive(Debug, Clone, Copy)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded, self.failed)
    }
}
