//! In-memory provider for tests
//!
//! Enabled for this crate's tests and for dependents through the
//! `test-utils` feature.

use async_trait::async_trait;
use cloudmirror_cloud::{
    AuthStatus, BatchOperationResult, CloudError, CloudResource, ListFilter, Operation,
    OperationKind, PageRequest, PageToken, PaginationStyle, ResourcePage, ResourceProvider,
    ResourceRef, ResourceType, Result, Vendor,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type InventoryKey = (String, String, ResourceType);

/// Provider serving a fixed inventory with the vendor's pagination style
#[derive(Default)]
pub struct StaticProvider {
    vendor: Option<Vendor>,
    inventory: RwLock<BTreeMap<InventoryKey, Vec<CloudResource>>>,
    fail_list_page: Option<usize>,
    fail_regions: HashSet<String>,
    fail_types: HashSet<ResourceType>,
    denied_accounts: HashSet<String>,
    repeat_token: bool,
    list_delay: Option<Duration>,
    settle_rounds: u32,
    outcome_status: Option<String>,
    partial_failed: bool,
    pending: Mutex<HashMap<String, u32>>,
    created: AtomicUsize,
    list_calls: AtomicUsize,
    state_calls: AtomicUsize,
    operations: Mutex<Vec<Operation>>,
}

impl StaticProvider {
    pub fn new(vendor: Vendor) -> Self {
        Self {
            vendor: Some(vendor),
            ..Self::default()
        }
    }

    pub fn with_resources(
        self,
        account_id: &str,
        region: &str,
        resources: impl IntoIterator<Item = CloudResource>,
    ) -> Self {
        self.put_resources(account_id, region, resources);
        self
    }

    /// Every listing fails on its `page`-th page (1-based)
    pub fn fail_list_page(mut self, page: usize) -> Self {
        self.fail_list_page = Some(page);
        self
    }

    /// Every listing in `region` fails
    pub fn fail_region(mut self, region: &str) -> Self {
        self.fail_regions.insert(region.to_string());
        self
    }

    /// Every listing of `resource_type` fails
    pub fn fail_type(mut self, resource_type: ResourceType) -> Self {
        self.fail_types.insert(resource_type);
        self
    }

    pub fn deny_account(mut self, account_id: &str) -> Self {
        self.denied_accounts.insert(account_id.to_string());
        self
    }

    /// Return the first continuation token again instead of advancing
    pub fn repeat_token(mut self) -> Self {
        self.repeat_token = true;
        self
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    /// Status targets end in after an operation, and how many state queries
    /// report them as `PENDING` first
    pub fn with_operation_effect(mut self, status: &str, settle_rounds: u32) -> Self {
        self.outcome_status = Some(status.to_string());
        self.settle_rounds = settle_rounds;
        self
    }

    /// Report batches with a rejected target as `PartialFailed`, which only
    /// carries the IDs that succeeded
    pub fn with_partial_failures(mut self) -> Self {
        self.partial_failed = true;
        self
    }

    /// Add or replace resources of an account/region
    pub fn put_resources(
        &self,
        account_id: &str,
        region: &str,
        resources: impl IntoIterator<Item = CloudResource>,
    ) {
        let mut inventory = self.inventory.write();
        for resource in resources {
            let list = inventory
                .entry((account_id.to_string(), region.to_string(), resource.resource_type))
                .or_default();
            match list.iter_mut().find(|r| r.cloud_id == resource.cloud_id) {
                Some(existing) => *existing = resource,
                None => list.push(resource),
            }
        }
    }

    pub fn remove_resources(&self, account_id: &str, region: &str, resource_type: ResourceType, cloud_ids: &[&str]) {
        let key = (account_id.to_string(), region.to_string(), resource_type);
        if let Some(list) = self.inventory.write().get_mut(&key) {
            list.retain(|r| !cloud_ids.contains(&r.cloud_id.as_str()));
        }
    }

    pub fn set_status(&self, cloud_id: &str, status: &str) {
        for list in self.inventory.write().values_mut() {
            for resource in list.iter_mut().filter(|r| r.cloud_id == cloud_id) {
                resource.status = Some(status.to_string());
            }
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn state_calls(&self) -> usize {
        self.state_calls.load(Ordering::SeqCst)
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().clone()
    }

    fn vendor_or_default(&self) -> Vendor {
        self.vendor.unwrap_or(Vendor::TCloud)
    }

    fn decode(&self, token: &PageToken) -> Result<usize> {
        let offset = match (self.vendor_or_default().pagination(), token) {
            (_, PageToken::Start) => Some(0),
            (PaginationStyle::Offset, PageToken::Offset(offset)) => Some(*offset as usize),
            (PaginationStyle::Token, PageToken::Token(token)) => token
                .strip_prefix("tok-")
                .and_then(|offset| offset.parse().ok()),
            (PaginationStyle::SelfLink, PageToken::Link(link)) => link
                .rsplit_once("$skiptoken=")
                .and_then(|(_, offset)| offset.parse().ok()),
            _ => None,
        };
        offset.ok_or_else(|| CloudError::InvalidParameter(format!("bad page token: {:?}", token)))
    }

    fn encode(&self, offset: usize) -> PageToken {
        match self.vendor_or_default().pagination() {
            PaginationStyle::Offset => PageToken::Offset(offset as u64),
            PaginationStyle::Token => PageToken::Token(format!("tok-{}", offset)),
            PaginationStyle::SelfLink => PageToken::Link(format!(
                "https://management.azure.com/resources?$skiptoken={}",
                offset
            )),
        }
    }

    fn apply_effect(&self, op: &Operation) -> BatchOperationResult {
        let key = (op.account_id.clone(), op.region.clone(), op.resource_type);
        let mut inventory = self.inventory.write();
        let list = inventory.entry(key).or_default();

        let targets: Vec<String> = match op.kind {
            OperationKind::Create => {
                let count = op.params.get("count").and_then(|c| c.as_u64()).unwrap_or(1);
                (0..count)
                    .map(|_| {
                        let n = self.created.fetch_add(1, Ordering::SeqCst);
                        let id = format!("{}-new-{}", op.resource_type, n);
                        list.push(CloudResource::new(op.resource_type, id.clone()));
                        id
                    })
                    .collect()
            }
            _ => op.cloud_ids.clone(),
        };

        let mut result = BatchOperationResult::new();
        for id in targets {
            let Some(resource) = list.iter_mut().find(|r| r.cloud_id == id) else {
                result.add_failure(id.clone(), format!("{} not found", id));
                continue;
            };
            let attachment = op
                .params
                .get("target_type")
                .and_then(|t| t.as_str())
                .and_then(|t| t.parse::<ResourceType>().ok())
                .zip(op.params.get("target_id").and_then(|t| t.as_str()))
                .map(|(ty, target)| ResourceRef::new(ty, target));
            match (op.kind, attachment) {
                (OperationKind::Attach, Some(target)) => {
                    if !resource.relations.contains(&target) {
                        resource.relations.push(target);
                    }
                }
                (OperationKind::Detach, Some(target)) => resource.relations.retain(|r| *r != target),
                _ => {}
            }
            if let Some(status) = &self.outcome_status {
                resource.status = Some(status.clone());
            }
            if self.settle_rounds > 0 {
                self.pending.lock().insert(id.clone(), self.settle_rounds);
            }
            result.add_success(id);
        }
        if op.kind == OperationKind::Delete {
            list.retain(|r| !result.success_ids.contains(&r.cloud_id));
        }
        result
    }
}

#[async_trait]
impl ResourceProvider for StaticProvider {
    fn vendor(&self) -> Vendor {
        self.vendor_or_default()
    }

    fn name(&self) -> &str {
        "static"
    }

    async fn check_auth(&self, account_id: &str) -> Result<AuthStatus> {
        if self.denied_accounts.contains(account_id) {
            Ok(AuthStatus::failed(format!("credentials for {} rejected", account_id)))
        } else {
            Ok(AuthStatus::ok(account_id))
        }
    }

    async fn list_resources(&self, filter: &ListFilter, page: &PageRequest) -> Result<ResourcePage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }

        let limit = page.limit.max(1) as usize;
        let offset = self.decode(&page.token)?;
        let page_number = offset / limit + 1;

        if self.fail_regions.contains(&filter.region)
            || self.fail_types.contains(&filter.resource_type)
            || self.fail_list_page == Some(page_number)
        {
            return Err(CloudError::ProviderFatal(format!(
                "{} listing failed on page {}",
                filter.resource_type, page_number
            )));
        }

        let key = (filter.account_id.clone(), filter.region.clone(), filter.resource_type);
        let all = self.inventory.read().get(&key).cloned().unwrap_or_default();
        let items: Vec<CloudResource> = all.iter().skip(offset).take(limit).cloned().collect();

        if offset + limit >= all.len() {
            return Ok(ResourcePage::last(items));
        }
        let next = if self.repeat_token && offset > 0 {
            page.token.clone()
        } else {
            self.encode(offset + limit)
        };
        Ok(ResourcePage::with_next(items, next))
    }

    async fn get_resource_state(
        &self,
        filter: &ListFilter,
        cloud_ids: &[String],
    ) -> Result<Vec<CloudResource>> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);

        let key = (filter.account_id.clone(), filter.region.clone(), filter.resource_type);
        let inventory = self.inventory.read();
        let Some(list) = inventory.get(&key) else {
            return Ok(Vec::new());
        };

        let mut pending = self.pending.lock();
        Ok(list
            .iter()
            .filter(|r| cloud_ids.contains(&r.cloud_id))
            .cloned()
            .map(|mut resource| {
                if let Some(rounds) = pending.get_mut(&resource.cloud_id) {
                    if *rounds > 0 {
                        *rounds -= 1;
                        resource.status = Some("PENDING".to_string());
                    }
                }
                resource
            })
            .collect())
    }

    async fn submit_operation(&self, op: &Operation) -> Result<BatchOperationResult> {
        self.operations.lock().push(op.clone());
        if op.dry_run {
            return Ok(BatchOperationResult::succeeded(op.cloud_ids.clone()));
        }
        let result = self.apply_effect(op);
        if self.partial_failed {
            return result.into_result().map(BatchOperationResult::succeeded);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operation_effect_settles() {
        let provider = StaticProvider::new(Vendor::TCloud)
            .with_resources(
                "acc-1",
                "ap-guangzhou",
                [CloudResource::new(ResourceType::Cvm, "ins-1").with_status("STOPPED")],
            )
            .with_operation_effect("RUNNING", 1);

        let op = Operation::new(OperationKind::Start, ResourceType::Cvm, "acc-1", "ap-guangzhou")
            .with_targets(["ins-1"]);
        let result = provider.submit_operation(&op).await.unwrap();
        assert_eq!(result.success_ids, vec!["ins-1"]);

        let filter = ListFilter::new("acc-1", "ap-guangzhou", ResourceType::Cvm);
        let ids = vec!["ins-1".to_string()];
        let first = provider.get_resource_state(&filter, &ids).await.unwrap();
        assert_eq!(first[0].status.as_deref(), Some("PENDING"));
        let second = provider.get_resource_state(&filter, &ids).await.unwrap();
        assert_eq!(second[0].status.as_deref(), Some("RUNNING"));
    }

    #[tokio::test]
    async fn test_attach_adds_relation() {
        let provider = StaticProvider::new(Vendor::Aws).with_resources(
            "acc-1",
            "us-east-1",
            [CloudResource::new(ResourceType::Cvm, "i-1")],
        );
        let op = Operation::new(OperationKind::Attach, ResourceType::Cvm, "acc-1", "us-east-1")
            .with_targets(["i-1"])
            .with_params(serde_json::json!({"target_type": "disk", "target_id": "vol-1"}));
        provider.submit_operation(&op).await.unwrap();

        let filter = ListFilter::new("acc-1", "us-east-1", ResourceType::Cvm);
        let state = provider
            .get_resource_state(&filter, &["i-1".to_string()])
            .await
            .unwrap();
        assert_eq!(state[0].relations, vec![ResourceRef::new(ResourceType::Disk, "vol-1")]);
    }
}
