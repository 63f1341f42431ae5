#![allow(dead_code)]

use cloudmirror_cloud::{CloudResource, ResourceType, Vendor};
use cloudmirror_core::testing::StaticProvider;
use cloudmirror_core::{
    LocalResourceRecord, LocalStore, MemoryStore, SyncOrchestrator, SyncSettings, TrackerConfig,
};
use std::sync::Arc;
use std::time::Duration;

pub const ACCOUNT: &str = "acc-1";
pub const REGION: &str = "ap-guangzhou";

pub fn resources(resource_type: ResourceType, prefix: &str, count: usize) -> Vec<CloudResource> {
    (0..count)
        .map(|i| CloudResource::new(resource_type, format!("{}-{}", prefix, i)).with_status("AVAILABLE"))
        .collect()
}

pub fn records(vendor: Vendor, region: &str, resources: &[CloudResource]) -> Vec<LocalResourceRecord> {
    resources
        .iter()
        .map(|resource| LocalResourceRecord::from_cloud(vendor, ACCOUNT, region, resource))
        .collect()
}

pub fn settings(cooldown: Duration) -> SyncSettings {
    SyncSettings {
        concurrency: 3,
        tracker: TrackerConfig {
            cooldown,
            lease_ttl: Duration::from_secs(30 * 60),
        },
        ..SyncSettings::default()
    }
}

pub fn orchestrator(
    provider: &Arc<StaticProvider>,
    store: &Arc<MemoryStore>,
    cooldown: Duration,
) -> SyncOrchestrator {
    SyncOrchestrator::new(store.clone(), settings(cooldown)).with_provider(provider.clone())
}

pub async fn seed(store: &MemoryStore, vendor: Vendor, region: &str, resources: &[CloudResource]) {
    store.upsert(records(vendor, region, resources)).await.unwrap();
}

pub fn regions(list: &[&str]) -> Vec<String> {
    list.iter().map(|r| r.to_string()).collect()
}
