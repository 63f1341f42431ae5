//! Local authoritative store
//!
//! Records and relation edges are written through [`WriteBatch`]es, which a
//! store applies atomically: a reader never sees a page's records without the
//! relations computed from them.

mod file;
mod memory;

pub use file::{FileStore, StateFiles, WriterLock};
pub use memory::MemoryStore;

use crate::error::Result;
use crate::model::{LocalResourceRecord, RecordKey, RelationEdge, Scope};
use crate::status::StatusRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudmirror_cloud::{ResourceRef, Vendor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// New edge set of one owner, replacing whatever was stored before
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationReplacement {
    pub vendor: Vendor,
    pub account_id: String,
    pub owner: ResourceRef,
    pub targets: Vec<ResourceRef>,
}

impl RelationReplacement {
    fn owner_key(&self) -> String {
        owner_key(self.vendor, &self.account_id, &self.owner)
    }

    pub fn edges(&self) -> Vec<RelationEdge> {
        let mut edges: Vec<RelationEdge> = self
            .targets
            .iter()
            .map(|to| RelationEdge::new(self.vendor, &self.account_id, self.owner.clone(), to.clone()))
            .collect();
        edges.sort();
        edges.dedup();
        edges
    }
}

fn owner_key(vendor: Vendor, account_id: &str, owner: &ResourceRef) -> String {
    format!("{}:{}:{}", vendor, account_id, owner)
}

/// Changes applied to the store as one unit
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub upserts: Vec<LocalResourceRecord>,
    pub deletes: Vec<RecordKey>,
    pub relations: Vec<RelationReplacement>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty() && self.relations.is_empty()
    }
}

/// Persistence of mirrored records, relations and sync statuses
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Apply every change of the batch, or none
    async fn apply(&self, batch: WriteBatch) -> Result<()>;

    async fn upsert(&self, records: Vec<LocalResourceRecord>) -> Result<()> {
        self.apply(WriteBatch {
            upserts: records,
            ..WriteBatch::default()
        })
        .await
    }

    /// Records of the scope with the given cloud IDs
    async fn get_by_cloud_ids(
        &self,
        scope: &Scope,
        cloud_ids: &[String],
    ) -> Result<Vec<LocalResourceRecord>>;

    async fn list(&self, scope: &Scope) -> Result<Vec<LocalResourceRecord>>;

    async fn list_cloud_ids(&self, scope: &Scope) -> Result<BTreeSet<String>> {
        Ok(self
            .list(scope)
            .await?
            .into_iter()
            .map(|record| record.cloud_id)
            .collect())
    }

    /// Delete records of the scope whose cloud ID is not in `seen`, along
    /// with every edge touching them; returns the number of records deleted
    async fn delete_by_cloud_ids_not_in(&self, scope: &Scope, seen: &HashSet<String>) -> Result<usize>;

    /// Edges from or to `resource`
    async fn relations(
        &self,
        vendor: Vendor,
        account_id: &str,
        resource: &ResourceRef,
    ) -> Result<Vec<RelationEdge>>;

    async fn load_statuses(&self) -> Result<Vec<StatusRecord>>;

    async fn save_statuses(&self, statuses: &[StatusRecord]) -> Result<()>;
}

pub(crate) const STATE_VERSION: u32 = 1;

/// Everything a store holds, as serialized to `state.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreState {
    pub version: u32,

    pub updated_at: DateTime<Utc>,

    /// Records indexed by `vendor:account:region:type:id`
    #[serde(default)]
    pub records: BTreeMap<String, LocalResourceRecord>,

    /// Edges indexed by owner `vendor:account:type:id`
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<RelationEdge>>,

    #[serde(default)]
    pub statuses: Vec<StatusRecord>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            records: BTreeMap::new(),
            relations: BTreeMap::new(),
            statuses: Vec::new(),
        }
    }
}

impl StoreState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, batch: WriteBatch) {
        for key in &batch.deletes {
            if let Some(record) = self.records.remove(&key.to_string()) {
                self.remove_edges_of(record.vendor, &record.account_id, &record.to_ref());
            }
        }
        for record in batch.upserts {
            self.records.insert(record.key().to_string(), record);
        }
        for replacement in batch.relations {
            let edges = replacement.edges();
            if edges.is_empty() {
                self.relations.remove(&replacement.owner_key());
            } else {
                self.relations.insert(replacement.owner_key(), edges);
            }
        }
        self.updated_at = Utc::now();
    }

    pub fn select<'a>(&'a self, scope: &'a Scope) -> impl Iterator<Item = &'a LocalResourceRecord> + 'a {
        self.records.values().filter(move |record| scope.contains(record))
    }

    pub fn delete_not_in(&mut self, scope: &Scope, seen: &HashSet<String>) -> usize {
        let doomed: Vec<LocalResourceRecord> = self
            .select(scope)
            .filter(|record| !seen.contains(&record.cloud_id))
            .cloned()
            .collect();
        for record in &doomed {
            self.records.remove(&record.key().to_string());
            // Another region of the account may still hold the same cloud ID
            if !self.records.values().any(|other| {
                other.vendor == record.vendor
                    && other.account_id == record.account_id
                    && other.to_ref() == record.to_ref()
            }) {
                self.remove_edges_of(record.vendor, &record.account_id, &record.to_ref());
            }
        }
        if !doomed.is_empty() {
            self.updated_at = Utc::now();
        }
        doomed.len()
    }

    fn remove_edges_of(&mut self, vendor: Vendor, account_id: &str, resource: &ResourceRef) {
        self.relations.remove(&owner_key(vendor, account_id, resource));
        self.relations.retain(|_, edges| {
            edges.retain(|edge| {
                !(edge.vendor == vendor && edge.account_id == account_id && edge.to == *resource)
            });
            !edges.is_empty()
        });
    }

    pub fn relations_of(&self, vendor: Vendor, account_id: &str, resource: &ResourceRef) -> Vec<RelationEdge> {
        let mut edges: Vec<RelationEdge> = self
            .relations
            .values()
            .flatten()
            .filter(|edge| {
                edge.vendor == vendor && edge.account_id == account_id && edge.touches(resource)
            })
            .cloned()
            .collect();
        edges.sort();
        edges
    }
}
