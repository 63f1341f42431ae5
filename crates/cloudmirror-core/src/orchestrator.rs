//! Multi-region, multi-type sync orchestration

use crate::cursor::DEFAULT_PAGE_SIZE;
use crate::error::{Result, SyncError};
use crate::gate::{ConcurrencyGate, DEFAULT_CONCURRENCY};
use crate::handler::{HandlerReport, PageStats, ProviderSyncHandler, SyncHandler, SyncRequest, run_sync_handler};
use crate::model::Scope;
use crate::poller::{PollOptions, PollOutcome, ResourceClassifier, execute_operation};
use crate::status::{ScopeStatus, SyncStatusTracker, TrackerConfig};
use crate::store::LocalStore;
use cloudmirror_cloud::{Operation, ResourceProvider, ResourceType, Vendor};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Orchestrator tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Regions synced at once
    pub concurrency: usize,
    pub page_size: u32,
    pub tracker: TrackerConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
            tracker: TrackerConfig::default(),
        }
    }
}

/// What to sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorRequest {
    pub vendor: Vendor,
    pub account_id: String,
    pub regions: Vec<String>,
    /// Empty means every resource type
    pub resource_types: Vec<ResourceType>,
}

impl OrchestratorRequest {
    pub fn new(vendor: Vendor, account_id: impl Into<String>, regions: Vec<String>) -> Self {
        Self {
            vendor,
            account_id: account_id.into(),
            regions,
            resource_types: Vec::new(),
        }
    }

    pub fn with_types(mut self, resource_types: impl IntoIterator<Item = ResourceType>) -> Self {
        self.resource_types = resource_types.into_iter().collect();
        self
    }

    /// Requested types in dependency order
    fn ordered_types(&self) -> Vec<ResourceType> {
        if self.resource_types.is_empty() {
            return ResourceType::ALL.to_vec();
        }
        let mut types: Vec<ResourceType> = self
            .resource_types
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        types.sort_by_key(|ty| ty.sync_rank());
        types
    }
}

/// Why a resource type was not synced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AlreadySyncing,
    FrequencyLimited { retry_after: Duration },
    DependencyFailed(ResourceType),
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadySyncing => write!(f, "already syncing"),
            SkipReason::FrequencyLimited { retry_after } => {
                write!(f, "frequency limited, retry after {}s", retry_after.as_secs())
            }
            SkipReason::DependencyFailed(ty) => write!(f, "dependency failed: {}", ty),
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug)]
pub enum SyncOutcome {
    Synced,
    Skipped(SkipReason),
    Failed(SyncError),
}

/// Result of one resource type
#[derive(Debug)]
pub struct ResourceSyncSummary {
    pub resource_type: ResourceType,
    pub outcome: SyncOutcome,
    pub regions: Vec<HandlerReport>,
    pub stats: PageStats,
    pub elapsed: Duration,
}

impl ResourceSyncSummary {
    fn skipped(resource_type: ResourceType, reason: SkipReason) -> Self {
        Self {
            resource_type,
            outcome: SyncOutcome::Skipped(reason),
            regions: Vec::new(),
            stats: PageStats::default(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Failed(_))
    }
}

/// Result of [`SyncOrchestrator::sync`]
#[derive(Debug)]
pub struct SyncReport {
    pub vendor: Vendor,
    pub account_id: String,
    pub resources: Vec<ResourceSyncSummary>,
    pub elapsed: Duration,
}

impl SyncReport {
    /// First failure in sync order
    pub fn first_error(&self) -> Option<&SyncError> {
        self.resources.iter().find_map(|summary| match &summary.outcome {
            SyncOutcome::Failed(e) => Some(e),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.first_error().is_none()
    }

    pub fn summary(&self, resource_type: ResourceType) -> Option<&ResourceSyncSummary> {
        self.resources.iter().find(|s| s.resource_type == resource_type)
    }

    pub fn totals(&self) -> PageStats {
        let mut totals = PageStats::default();
        for summary in &self.resources {
            totals += summary.stats;
        }
        totals
    }
}

/// Syncs accounts across regions and resource types
pub struct SyncOrchestrator {
    providers: HashMap<Vendor, Arc<dyn ResourceProvider>>,
    store: Arc<dyn LocalStore>,
    tracker: Arc<SyncStatusTracker>,
    gate: ConcurrencyGate,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn LocalStore>, settings: SyncSettings) -> Self {
        Self {
            providers: HashMap::new(),
            store,
            tracker: Arc::new(SyncStatusTracker::new(settings.tracker)),
            gate: ConcurrencyGate::new(settings.concurrency),
            settings,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.providers.insert(provider.vendor(), provider);
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn tracker(&self) -> &SyncStatusTracker {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    fn provider(&self, vendor: Vendor) -> Result<Arc<dyn ResourceProvider>> {
        self.providers
            .get(&vendor)
            .cloned()
            .ok_or_else(|| SyncError::InvalidParameter(format!("vendor: {} not support", vendor)))
    }

    /// Load statuses persisted by a previous process
    pub async fn restore_statuses(&self) -> Result<usize> {
        let records = self.store.load_statuses().await?;
        Ok(self.tracker.restore(records))
    }

    async fn persist_statuses(&self) {
        if let Err(e) = self.store.save_statuses(&self.tracker.snapshot()).await {
            tracing::warn!("failed to persist sync statuses: {}", e);
        }
    }

    pub fn status(&self, scope: &Scope) -> ScopeStatus {
        self.tracker.get(scope)
    }

    /// Sync every requested resource type in dependency order
    ///
    /// A failed type skips the requested types that depend on it; independent
    /// types still run. Per-type failures are reported in the returned
    /// report, not as an `Err`.
    pub async fn sync(&self, request: OrchestratorRequest, cancel: &CancellationToken) -> Result<SyncReport> {
        let provider = self.provider(request.vendor)?;
        let regions = validate(&request.account_id, &request.regions)?;
        let started = Instant::now();

        tracing::info!(
            vendor = %request.vendor,
            account_id = %request.account_id,
            regions = regions.len(),
            "starting sync"
        );

        let mut failed: BTreeSet<ResourceType> = BTreeSet::new();
        let mut resources = Vec::new();

        for resource_type in request.ordered_types() {
            if cancel.is_cancelled() {
                resources.push(ResourceSyncSummary::skipped(resource_type, SkipReason::Cancelled));
                continue;
            }
            if let Some(dependency) = resource_type.depends_on().iter().find(|dep| failed.contains(dep)) {
                tracing::warn!(
                    resource_type = %resource_type,
                    "skipping, dependency {} failed",
                    dependency
                );
                failed.insert(resource_type);
                resources.push(ResourceSyncSummary::skipped(
                    resource_type,
                    SkipReason::DependencyFailed(*dependency),
                ));
                continue;
            }

            let type_started = Instant::now();
            let result = self
                .run_type(&provider, request.vendor, &request.account_id, &regions, resource_type, cancel)
                .await;
            let elapsed = type_started.elapsed();

            let summary = match result {
                Ok(reports) => {
                    let mut stats = PageStats::default();
                    for report in &reports {
                        stats += report.stats;
                    }
                    ResourceSyncSummary {
                        resource_type,
                        outcome: SyncOutcome::Synced,
                        regions: reports,
                        stats,
                        elapsed,
                    }
                }
                Err(SyncError::AlreadySyncing(_)) => {
                    ResourceSyncSummary::skipped(resource_type, SkipReason::AlreadySyncing)
                }
                Err(SyncError::FrequencyLimited { retry_after, .. }) => {
                    ResourceSyncSummary::skipped(resource_type, SkipReason::FrequencyLimited { retry_after })
                }
                Err(e) => {
                    tracing::error!(resource_type = %resource_type, "sync failed: {}", e);
                    failed.insert(resource_type);
                    ResourceSyncSummary {
                        resource_type,
                        outcome: SyncOutcome::Failed(e),
                        regions: Vec::new(),
                        stats: PageStats::default(),
                        elapsed,
                    }
                }
            };
            resources.push(summary);
            self.persist_statuses().await;
        }

        let report = SyncReport {
            vendor: request.vendor,
            account_id: request.account_id,
            resources,
            elapsed: started.elapsed(),
        };
        let totals = report.totals();
        tracing::info!(
            vendor = %report.vendor,
            account_id = %report.account_id,
            created = totals.created,
            updated = totals.updated,
            deleted = totals.deleted,
            "sync finished in {:.2?}",
            report.elapsed
        );
        Ok(report)
    }

    /// Sync one resource type across regions
    ///
    /// Fails with `AlreadySyncing` or `FrequencyLimited`, without calling the
    /// provider, when the scope cannot start.
    pub async fn sync_resource(
        &self,
        vendor: Vendor,
        account_id: &str,
        regions: &[String],
        resource_type: ResourceType,
        cancel: &CancellationToken,
    ) -> Result<Vec<HandlerReport>> {
        let provider = self.provider(vendor)?;
        let regions = validate(account_id, regions)?;
        let result = self
            .run_type(&provider, vendor, account_id, &regions, resource_type, cancel)
            .await;
        self.persist_statuses().await;
        result
    }

    async fn run_type(
        &self,
        provider: &Arc<dyn ResourceProvider>,
        vendor: Vendor,
        account_id: &str,
        regions: &[String],
        resource_type: ResourceType,
        cancel: &CancellationToken,
    ) -> Result<Vec<HandlerReport>> {
        let scope = Scope::new(vendor, account_id, resource_type);
        let permit = Arc::new(self.tracker.try_start(&scope)?);

        let result = self
            .gate
            .run(regions.to_vec(), |region| {
                let provider = Arc::clone(provider);
                let store = Arc::clone(&self.store);
                let permit = Arc::clone(&permit);
                let cancel = cancel.clone();
                let request = SyncRequest::new(vendor, account_id, region);
                let page_size = self.settings.page_size;
                async move {
                    let mut handler = ProviderSyncHandler::new(provider, store, resource_type, page_size);
                    run_sync_handler(&mut handler, &request, &cancel, Some(&permit)).await
                }
            })
            .await;

        match &result {
            Ok(_) => {
                permit.succeed();
            }
            Err(e) => {
                permit.fail(e.to_string());
            }
        }
        result
    }

    /// Run an operation through the poller, then refresh what it touched
    ///
    /// Resources that reached the expected state are re-read from the
    /// provider so their records and relations reflect the operation. The
    /// refresh also runs when polling ended early with some successes.
    pub async fn submit_and_wait<C: ResourceClassifier>(
        &self,
        vendor: Vendor,
        op: &Operation,
        classifier: C,
        options: PollOptions,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome> {
        let provider = self.provider(vendor)?;
        let result = execute_operation(Arc::clone(&provider), op, classifier, options, cancel).await;

        if op.dry_run {
            return result;
        }
        let outcome = match &result {
            Ok(outcome) => Some(outcome),
            Err(e) => e.outcome(),
        };
        let ids: Vec<String> = outcome
            .map(|outcome| outcome.success_ids.iter().cloned().collect())
            .unwrap_or_default();
        if !ids.is_empty() {
            let request = SyncRequest::new(vendor, &op.account_id, &op.region);
            let mut refresh =
                ProviderSyncHandler::new(provider, Arc::clone(&self.store), op.resource_type, self.settings.page_size)
                    .for_request(request);
            match refresh.sync(&ids).await {
                Ok(stats) => tracing::debug!(
                    operation = %op.kind,
                    updated = stats.updated,
                    created = stats.created,
                    deleted = stats.deleted,
                    "refreshed resources after operation"
                ),
                Err(e) => tracing::warn!(operation = %op.kind, "refresh after operation failed: {}", e),
            }
        }
        result
    }
}

fn validate(account_id: &str, regions: &[String]) -> Result<Vec<String>> {
    if account_id.trim().is_empty() {
        return Err(SyncError::InvalidParameter("account_id is required".into()));
    }
    let mut unique: Vec<String> = Vec::with_capacity(regions.len());
    for region in regions {
        if region.trim().is_empty() {
            return Err(SyncError::InvalidParameter("region must not be empty".into()));
        }
        if !unique.contains(region) {
            unique.push(region.clone());
        }
    }
    if unique.is_empty() {
        return Err(SyncError::InvalidParameter("at least one region is required".into()));
    }
    Ok(unique)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::status::SyncState;
    use crate::store::MemoryStore;
    use crate::testing::StaticProvider;
    use cloudmirror_cloud::CloudResource;

    fn settings() -> SyncSettings {
        SyncSettings {
            tracker: TrackerConfig {
                cooldown: Duration::ZERO,
                lease_ttl: Duration::from_secs(60),
            },
            ..SyncSettings::default()
        }
    }

    #[test]
    fn test_ordered_types() {
        let request = OrchestratorRequest::new(Vendor::Aws, "acc-1", vec!["us-east-1".into()])
            .with_types([ResourceType::Cvm, ResourceType::Vpc, ResourceType::Disk, ResourceType::Vpc]);
        assert_eq!(
            request.ordered_types(),
            vec![ResourceType::Vpc, ResourceType::Disk, ResourceType::Cvm]
        );
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let orchestrator = SyncOrchestrator::new(Arc::new(MemoryStore::new()), settings())
            .with_provider(Arc::new(StaticProvider::new(Vendor::Aws)));
        let cancel = CancellationToken::new();

        let err = orchestrator
            .sync(OrchestratorRequest::new(Vendor::Gcp, "acc-1", vec!["us-east1".into()]), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid parameter: vendor: gcp not support");

        let err = orchestrator
            .sync(OrchestratorRequest::new(Vendor::Aws, "acc-1", vec![]), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let err = orchestrator
            .sync(OrchestratorRequest::new(Vendor::Aws, " ", vec!["us-east-1".into()]), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[tokio::test]
    async fn test_region_failure_fails_type() {
        let provider = StaticProvider::new(Vendor::TCloud)
            .with_resources("acc-1", "ap-guangzhou", [CloudResource::new(ResourceType::Eip, "eip-1")])
            .fail_region("ap-shanghai");
        let store = Arc::new(MemoryStore::new());
        let orchestrator = SyncOrchestrator::new(store.clone(), settings()).with_provider(Arc::new(provider));

        let err = orchestrator
            .sync_resource(
                Vendor::TCloud,
                "acc-1",
                &["ap-guangzhou".into(), "ap-shanghai".into()],
                ResourceType::Eip,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderFatal);

        // The healthy region still ran to completion
        assert_eq!(store.len().await, 1);
        let status = orchestrator.status(&Scope::new(Vendor::TCloud, "acc-1", ResourceType::Eip));
        assert_eq!(status.state, SyncState::Failed);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_statuses_persisted_and_restored() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = SyncOrchestrator::new(store.clone(), settings())
            .with_provider(Arc::new(StaticProvider::new(Vendor::Azure)));
        orchestrator
            .sync_resource(
                Vendor::Azure,
                "sub-1",
                &["eastus".into()],
                ResourceType::Disk,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let restarted = SyncOrchestrator::new(store.clone(), settings());
        assert_eq!(restarted.restore_statuses().await.unwrap(), 1);
        let status = restarted.status(&Scope::new(Vendor::Azure, "sub-1", ResourceType::Disk));
        assert_eq!(status.state, SyncState::Success);
    }
}
