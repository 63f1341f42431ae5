//! Snapshot provider implementation

use crate::error::SnapshotError;
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use cloudmirror_cloud::{
    AuthStatus, BatchOperationResult, CloudResource, ListFilter, Operation, PageRequest,
    PageToken, PaginationStyle, ResourcePage, ResourceProvider, RetryConfig, Vendor, with_retry,
};
use std::path::Path;

const LINK_BASE: &str = "snapshot://resources";

/// Read-only provider serving a vendor's inventory from a snapshot directory
///
/// Listings paginate the way the vendor's own APIs do, so the sync core sees
/// offset, token or self-link continuation depending on the vendor.
pub struct SnapshotProvider {
    snapshot: Snapshot,
    retry: RetryConfig,
}

impl SnapshotProvider {
    pub fn new(root: impl AsRef<Path>, vendor: Vendor) -> Self {
        Self {
            snapshot: Snapshot::new(root, vendor),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    async fn read(&self, filter: &ListFilter) -> cloudmirror_cloud::Result<Vec<CloudResource>> {
        let what = format!("read {} snapshot", filter.resource_type);
        with_retry(&self.retry, &what, || async {
            self.snapshot
                .read(&filter.account_id, &filter.region, filter.resource_type)
                .await
                .map_err(Into::into)
        })
        .await
    }

    fn decode(&self, token: &PageToken) -> Result<usize, SnapshotError> {
        let offset = match (self.snapshot.vendor().pagination(), token) {
            (_, PageToken::Start) => Some(0),
            (PaginationStyle::Offset, PageToken::Offset(offset)) => usize::try_from(*offset).ok(),
            (PaginationStyle::Token, PageToken::Token(token)) => token
                .strip_prefix("next-")
                .and_then(|offset| offset.parse().ok()),
            (PaginationStyle::SelfLink, PageToken::Link(link)) => link
                .strip_prefix(LINK_BASE)
                .and_then(|query| query.strip_prefix("?$skiptoken="))
                .and_then(|offset| offset.parse().ok()),
            _ => None,
        };
        offset.ok_or_else(|| SnapshotError::InvalidToken(format!("{:?}", token)))
    }

    fn encode(&self, offset: usize) -> PageToken {
        match self.snapshot.vendor().pagination() {
            PaginationStyle::Offset => PageToken::Offset(offset as u64),
            PaginationStyle::Token => PageToken::Token(format!("next-{}", offset)),
            PaginationStyle::SelfLink => PageToken::Link(format!("{}?$skiptoken={}", LINK_BASE, offset)),
        }
    }
}

#[async_trait]
impl ResourceProvider for SnapshotProvider {
    fn vendor(&self) -> Vendor {
        self.snapshot.vendor()
    }

    fn name(&self) -> &str {
        "snapshot"
    }

    async fn check_auth(&self, account_id: &str) -> cloudmirror_cloud::Result<AuthStatus> {
        match self.snapshot.check_account(account_id).await {
            Ok(dir) => Ok(AuthStatus::ok(format!("{} ({})", account_id, dir.display()))),
            Err(e @ (SnapshotError::AccountNotFound(_) | SnapshotError::RootNotFound(_))) => {
                Ok(AuthStatus::failed(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_resources(
        &self,
        filter: &ListFilter,
        page: &PageRequest,
    ) -> cloudmirror_cloud::Result<ResourcePage> {
        let offset = self.decode(&page.token)?;
        let limit = page.limit.clamp(1, self.vendor().max_page_size()) as usize;
        let all = self.read(filter).await?;

        let end = offset.saturating_add(limit).min(all.len());
        let items = all.get(offset..end).map(<[CloudResource]>::to_vec).unwrap_or_default();

        tracing::debug!(
            vendor = %self.vendor(),
            region = %filter.region,
            resource_type = %filter.resource_type,
            offset,
            items = items.len(),
            "served snapshot page"
        );

        if end >= all.len() {
            Ok(ResourcePage::last(items))
        } else {
            Ok(ResourcePage::with_next(items, self.encode(end)))
        }
    }

    async fn get_resource_state(
        &self,
        filter: &ListFilter,
        cloud_ids: &[String],
    ) -> cloudmirror_cloud::Result<Vec<CloudResource>> {
        let all = self.read(filter).await?;
        Ok(all
            .into_iter()
            .filter(|resource| cloud_ids.contains(&resource.cloud_id))
            .collect())
    }

    async fn submit_operation(&self, op: &Operation) -> cloudmirror_cloud::Result<BatchOperationResult> {
        Err(cloudmirror_cloud::CloudError::Unsupported(format!(
            "snapshot provider is read-only, cannot {} {}",
            op.kind, op.resource_type
        )))
    }
}
