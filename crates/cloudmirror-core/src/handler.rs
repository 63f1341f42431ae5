//! Per-resource-type sync handlers
//!
//! A handler run walks `Prepare → {Next → Sync}* → RemoveDeletedFromCloud`:
//! pages of cloud IDs come from the provider listing, each page is upserted
//! into the local store, and once the listing completed without error the
//! local records nobody listed are deleted.

use crate::cursor::ResourceListCursor;
use crate::error::{Result, SyncError};
use crate::model::{LocalResourceRecord, Scope};
use crate::relation::{RelationReconciler, RelationStats};
use crate::status::SyncPermit;
use crate::store::{LocalStore, WriteBatch};
use async_trait::async_trait;
use cloudmirror_cloud::{CloudResource, ListFilter, ResourceProvider, ResourceType, Vendor};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where a handler run syncs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub vendor: Vendor,
    pub account_id: String,
    pub region: String,
}

impl SyncRequest {
    pub fn new(vendor: Vendor, account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            vendor,
            account_id: account_id.into(),
            region: region.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_id.trim().is_empty() {
            return Err(SyncError::InvalidParameter("account_id is required".into()));
        }
        if self.region.trim().is_empty() {
            return Err(SyncError::InvalidParameter("region is required".into()));
        }
        Ok(())
    }

    pub fn scope(&self, resource_type: ResourceType) -> Scope {
        Scope::new(self.vendor, &self.account_id, resource_type).with_region(&self.region)
    }

    pub fn filter(&self, resource_type: ResourceType) -> ListFilter {
        ListFilter::new(&self.account_id, &self.region, resource_type)
    }
}

/// What a run does when a page fails to sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialFailurePolicy {
    /// Keep going and report one aggregate error at the end
    Continue,
    /// Stop at the first failed page
    Abort,
}

/// Bulk inventory continues past bad pages; network topology does not
pub fn policy_for(resource_type: ResourceType) -> PartialFailurePolicy {
    match resource_type {
        ResourceType::Vpc | ResourceType::SecurityGroup | ResourceType::RouteTable => {
            PartialFailurePolicy::Abort
        }
        ResourceType::Subnet
        | ResourceType::Disk
        | ResourceType::Eip
        | ResourceType::NetworkInterface
        | ResourceType::Cvm => PartialFailurePolicy::Continue,
    }
}

/// Effect of syncing one page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub relations_added: usize,
    pub relations_removed: usize,
}

impl PageStats {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

impl std::ops::AddAssign for PageStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
        self.relations_added += other.relations_added;
        self.relations_removed += other.relations_removed;
    }
}

/// Result of a complete handler run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerReport {
    pub resource_type: ResourceType,
    pub region: String,
    pub pages: usize,
    pub stats: PageStats,
    /// Local records removed because the provider no longer lists them
    pub deleted: usize,
}

/// Sync of one resource type in one region
#[async_trait]
pub trait SyncHandler: Send {
    fn resource_type(&self) -> ResourceType;

    fn partial_failure_policy(&self) -> PartialFailurePolicy {
        policy_for(self.resource_type())
    }

    /// Validate the request and start a fresh listing
    async fn prepare(&mut self, request: &SyncRequest) -> Result<()>;

    /// Cloud IDs of the next listed page; `None` once the listing is done
    async fn next(&mut self) -> Result<Option<Vec<String>>>;

    /// Upsert the given resources into the local store
    async fn sync(&mut self, cloud_ids: &[String]) -> Result<PageStats>;

    /// Delete local records not seen in the listing
    ///
    /// Fails with `ListingIncomplete` unless the listing finished without
    /// error.
    async fn remove_deleted_from_cloud(&mut self) -> Result<usize>;
}

/// Drive a handler through a full run
///
/// Listing errors abort the run and suppress deletion. Page sync errors
/// follow the handler's [`PartialFailurePolicy`]. Cancellation is checked
/// between pages; the permit, when given, is heartbeaten after every page.
pub async fn run_sync_handler<H: SyncHandler + ?Sized>(
    handler: &mut H,
    request: &SyncRequest,
    cancel: &CancellationToken,
    permit: Option<&SyncPermit>,
) -> Result<HandlerReport> {
    let resource_type = handler.resource_type();
    let scope = request.scope(resource_type);
    let policy = handler.partial_failure_policy();
    let started = Instant::now();

    handler.prepare(request).await?;

    let mut report = HandlerReport {
        resource_type,
        region: request.region.clone(),
        pages: 0,
        stats: PageStats::default(),
        deleted: 0,
    };
    let mut failed_pages = 0;
    let mut affected = 0;
    let mut first_error: Option<SyncError> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled(format!(
                "sync of {} cancelled after {} page(s)",
                scope, report.pages
            )));
        }

        let cloud_ids = match handler.next().await {
            Ok(Some(cloud_ids)) => cloud_ids,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(scope = %scope, page = report.pages + 1, "listing failed: {}", e);
                return Err(e);
            }
        };
        report.pages += 1;

        match handler.sync(&cloud_ids).await {
            Ok(stats) => report.stats += stats,
            Err(e) if policy == PartialFailurePolicy::Abort => {
                tracing::error!(scope = %scope, page = report.pages, "page sync failed, aborting: {}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(scope = %scope, page = report.pages, "page sync failed, continuing: {}", e);
                failed_pages += 1;
                affected += cloud_ids.len();
                first_error.get_or_insert(e);
            }
        }

        if let Some(permit) = permit {
            permit.heartbeat();
        }
    }

    report.deleted = handler.remove_deleted_from_cloud().await?;
    report.stats.deleted += report.deleted;

    if let Some(first) = first_error {
        return Err(SyncError::Aggregate {
            resource_type,
            failed_pages,
            affected,
            first: Box::new(first),
        });
    }

    tracing::info!(
        scope = %scope,
        pages = report.pages,
        created = report.stats.created,
        updated = report.stats.updated,
        deleted = report.deleted,
        "synced in {:.2?}",
        started.elapsed()
    );
    Ok(report)
}

/// Generic handler backed by a [`ResourceProvider`] and a [`LocalStore`]
pub struct ProviderSyncHandler {
    provider: Arc<dyn ResourceProvider>,
    store: Arc<dyn LocalStore>,
    reconciler: RelationReconciler,
    resource_type: ResourceType,
    page_size: u32,
    request: Option<SyncRequest>,
    cursor: Option<ResourceListCursor>,
    exhausted: bool,
    page_cache: HashMap<String, CloudResource>,
    seen: HashSet<String>,
}

impl ProviderSyncHandler {
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        store: Arc<dyn LocalStore>,
        resource_type: ResourceType,
        page_size: u32,
    ) -> Self {
        let reconciler = RelationReconciler::new(Arc::clone(&store));
        Self {
            provider,
            store,
            reconciler,
            resource_type,
            page_size,
            request: None,
            cursor: None,
            exhausted: false,
            page_cache: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    /// Bind to a request without starting a listing, for targeted refreshes
    pub fn for_request(mut self, request: SyncRequest) -> Self {
        self.request = Some(request);
        self
    }

    fn request(&self) -> Result<&SyncRequest> {
        self.request
            .as_ref()
            .ok_or_else(|| SyncError::InvalidParameter("sync handler used before prepare".into()))
    }

    /// Current provider view of IDs not cached from the listing
    async fn describe(&self, filter: &ListFilter, cloud_ids: &[String]) -> Result<Vec<CloudResource>> {
        let mut resources = Vec::with_capacity(cloud_ids.len());
        for chunk in cloud_ids.chunks(self.provider.vendor().query_limit().max(1)) {
            resources.extend(self.provider.get_resource_state(filter, chunk).await?);
        }
        Ok(resources)
    }
}

#[async_trait]
impl SyncHandler for ProviderSyncHandler {
    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    async fn prepare(&mut self, request: &SyncRequest) -> Result<()> {
        request.validate()?;
        if request.vendor != self.provider.vendor() {
            return Err(SyncError::InvalidParameter(format!(
                "provider {} serves {}, not {}",
                self.provider.name(),
                self.provider.vendor(),
                request.vendor
            )));
        }

        self.cursor = Some(ResourceListCursor::new(
            Arc::clone(&self.provider),
            request.filter(self.resource_type),
            self.page_size,
        ));
        self.request = Some(request.clone());
        self.exhausted = false;
        self.page_cache.clear();
        self.seen.clear();
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<Vec<String>>> {
        if self.exhausted {
            return Ok(None);
        }
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| SyncError::InvalidParameter("sync handler used before prepare".into()))?;

        let page = cursor.next().await?;
        if !page.has_more {
            self.exhausted = true;
        }
        if page.items.is_empty() {
            return Ok(None);
        }

        let mut cloud_ids = Vec::with_capacity(page.items.len());
        for resource in page.items {
            if !cloud_ids.contains(&resource.cloud_id) {
                cloud_ids.push(resource.cloud_id.clone());
            }
            self.seen.insert(resource.cloud_id.clone());
            // Last writer wins within a run
            self.page_cache.insert(resource.cloud_id.clone(), resource);
        }
        Ok(Some(cloud_ids))
    }

    async fn sync(&mut self, cloud_ids: &[String]) -> Result<PageStats> {
        let request = self.request()?.clone();
        let scope = request.scope(self.resource_type);
        let filter = request.filter(self.resource_type);

        let mut resources = Vec::with_capacity(cloud_ids.len());
        let mut uncached = Vec::new();
        for id in cloud_ids {
            match self.page_cache.remove(id) {
                Some(resource) => resources.push(resource),
                None => uncached.push(id.clone()),
            }
        }

        let mut batch = WriteBatch::new();
        if !uncached.is_empty() {
            let described = self.describe(&filter, &uncached).await?;
            let existing = self.store.get_by_cloud_ids(&scope, &uncached).await?;
            for record in existing {
                if !described.iter().any(|r| r.cloud_id == record.cloud_id) {
                    batch.deletes.push(record.key());
                }
            }
            resources.extend(described);
        }

        let mut stats = PageStats {
            deleted: batch.deletes.len(),
            ..PageStats::default()
        };
        let ids: Vec<String> = resources.iter().map(|r| r.cloud_id.clone()).collect();
        let mut existing: HashMap<String, LocalResourceRecord> = self
            .store
            .get_by_cloud_ids(&scope, &ids)
            .await?
            .into_iter()
            .map(|record| (record.cloud_id.clone(), record))
            .collect();

        for resource in &resources {
            match existing.remove(&resource.cloud_id) {
                Some(mut record) if record.differs_from(resource) => {
                    record.refresh_from(resource);
                    batch.upserts.push(record);
                    stats.updated += 1;
                }
                Some(_) => stats.unchanged += 1,
                None => {
                    batch.upserts.push(LocalResourceRecord::from_cloud(
                        request.vendor,
                        &request.account_id,
                        &request.region,
                        resource,
                    ));
                    stats.created += 1;
                }
            }
        }

        if self.resource_type.owns_relations() {
            let plan = self
                .reconciler
                .plan(request.vendor, &request.account_id, &resources)
                .await?;
            let RelationStats { added, removed } = plan.stats;
            stats.relations_added = added;
            stats.relations_removed = removed;
            if added + removed > 0 {
                batch.relations = plan.replacements;
            }
        }

        self.store.apply(batch).await?;
        tracing::debug!(
            scope = %scope,
            created = stats.created,
            updated = stats.updated,
            unchanged = stats.unchanged,
            "synced page"
        );
        Ok(stats)
    }

    async fn remove_deleted_from_cloud(&mut self) -> Result<usize> {
        let scope = self.request()?.scope(self.resource_type);
        let complete = self.cursor.as_ref().is_some_and(|c| c.is_complete());
        if !complete {
            return Err(SyncError::ListingIncomplete {
                scope,
                reason: "refusing to delete without a complete listing".into(),
            });
        }

        let deleted = self.store.delete_by_cloud_ids_not_in(&scope, &self.seen).await?;
        if deleted > 0 {
            tracing::info!(scope = %scope, deleted, "removed resources deleted from cloud");
        }
        Ok(deleted)
    }
}
