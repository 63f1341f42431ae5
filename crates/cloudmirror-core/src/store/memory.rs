//! In-process store

use super::{LocalStore, StoreState, WriteBatch};
use crate::error::Result;
use crate::model::{LocalResourceRecord, RelationEdge, Scope};
use crate::status::StatusRecord;
use async_trait::async_trait;
use cloudmirror_cloud::{ResourceRef, Vendor};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Store keeping everything in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    records_written: AtomicUsize,
    batches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
            ..Self::default()
        }
    }

    /// Number of record upserts applied so far
    pub fn records_written(&self) -> usize {
        self.records_written.load(Ordering::SeqCst)
    }

    /// Number of non-empty batches applied so far
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    pub async fn state(&self) -> StoreState {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.records_written
            .fetch_add(batch.upserts.len(), Ordering::SeqCst);
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.state.write().await.apply(batch);
        Ok(())
    }

    async fn get_by_cloud_ids(
        &self,
        scope: &Scope,
        cloud_ids: &[String],
    ) -> Result<Vec<LocalResourceRecord>> {
        let wanted: HashSet<&String> = cloud_ids.iter().collect();
        Ok(self
            .state
            .read()
            .await
            .select(scope)
            .filter(|record| wanted.contains(&record.cloud_id))
            .cloned()
            .collect())
    }

    async fn list(&self, scope: &Scope) -> Result<Vec<LocalResourceRecord>> {
        Ok(self.state.read().await.select(scope).cloned().collect())
    }

    async fn delete_by_cloud_ids_not_in(&self, scope: &Scope, seen: &HashSet<String>) -> Result<usize> {
        Ok(self.state.write().await.delete_not_in(scope, seen))
    }

    async fn relations(
        &self,
        vendor: Vendor,
        account_id: &str,
        resource: &ResourceRef,
    ) -> Result<Vec<RelationEdge>> {
        Ok(self.state.read().await.relations_of(vendor, account_id, resource))
    }

    async fn load_statuses(&self) -> Result<Vec<StatusRecord>> {
        Ok(self.state.read().await.statuses.clone())
    }

    async fn save_statuses(&self, statuses: &[StatusRecord]) -> Result<()> {
        self.state.write().await.statuses = statuses.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudmirror_cloud::{CloudResource, ResourceType};

    #[tokio::test]
    async fn test_upsert_and_scope_queries() {
        let store = MemoryStore::new();
        let records: Vec<LocalResourceRecord> = ["ap-guangzhou", "ap-shanghai"]
            .iter()
            .map(|region| {
                LocalResourceRecord::from_cloud(
                    Vendor::TCloud,
                    "acc-1",
                    *region,
                    &CloudResource::new(ResourceType::Eip, format!("eip-{}", region)),
                )
            })
            .collect();
        store.upsert(records).await.unwrap();

        let account = Scope::new(Vendor::TCloud, "acc-1", ResourceType::Eip);
        assert_eq!(store.list(&account).await.unwrap().len(), 2);

        let region = account.clone().with_region("ap-shanghai");
        let found = store
            .get_by_cloud_ids(&region, &["eip-ap-shanghai".into(), "eip-ap-guangzhou".into()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(
            store.list_cloud_ids(&region).await.unwrap().into_iter().collect::<Vec<_>>(),
            vec!["eip-ap-shanghai"]
        );
        assert_eq!(store.records_written(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_counted() {
        let store = MemoryStore::new();
        store.apply(WriteBatch::new()).await.unwrap();
        assert_eq!(store.batches(), 0);
        assert!(store.is_empty().await);
    }
}
