//! Cross-resource relation edges
//!
//! Edges are owned by the resource that reports the attachment (the CVM) and
//! are always recomputed from the owner's current attachment list, replacing
//! whatever was stored before.

use crate::error::Result;
use crate::store::{LocalStore, RelationReplacement, WriteBatch};
use cloudmirror_cloud::{CloudResource, ListFilter, ResourceProvider, ResourceRef, ResourceType, Vendor};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Supported relation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    CvmDisk,
    CvmEip,
    CvmNetworkInterface,
    CvmSecurityGroup,
}

impl RelationKind {
    pub const ALL: [RelationKind; 4] = [
        RelationKind::CvmDisk,
        RelationKind::CvmEip,
        RelationKind::CvmNetworkInterface,
        RelationKind::CvmSecurityGroup,
    ];

    pub fn between(from: ResourceType, to: ResourceType) -> Option<Self> {
        RelationKind::ALL
            .into_iter()
            .find(|kind| kind.owner() == from && kind.target() == to)
    }

    pub fn owner(&self) -> ResourceType {
        ResourceType::Cvm
    }

    pub fn target(&self) -> ResourceType {
        match self {
            RelationKind::CvmDisk => ResourceType::Disk,
            RelationKind::CvmEip => ResourceType::Eip,
            RelationKind::CvmNetworkInterface => ResourceType::NetworkInterface,
            RelationKind::CvmSecurityGroup => ResourceType::SecurityGroup,
        }
    }
}

/// Edge changes of a reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationStats {
    pub added: usize,
    pub removed: usize,
}

/// Replacements to write, with their effect relative to the store
#[derive(Debug, Clone, Default)]
pub struct RelationPlan {
    pub replacements: Vec<RelationReplacement>,
    pub stats: RelationStats,
}

/// Recomputes relation edges from authoritative attachment lists
#[derive(Clone)]
pub struct RelationReconciler {
    store: Arc<dyn LocalStore>,
}

impl RelationReconciler {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Compute the replacements for every owner without writing them
    ///
    /// Resources of types that do not own relations are ignored, as are
    /// attachments of unsupported kinds.
    pub async fn plan(
        &self,
        vendor: Vendor,
        account_id: &str,
        owners: &[CloudResource],
    ) -> Result<RelationPlan> {
        let mut plan = RelationPlan::default();

        for owner in owners.iter().filter(|r| r.resource_type.owns_relations()) {
            let owner_ref = owner.to_ref();
            let desired: BTreeSet<ResourceRef> = owner
                .relations
                .iter()
                .filter(|target| RelationKind::between(owner.resource_type, target.resource_type).is_some())
                .cloned()
                .collect();
            let current: BTreeSet<ResourceRef> = self
                .store
                .relations(vendor, account_id, &owner_ref)
                .await?
                .into_iter()
                .filter(|edge| edge.from == owner_ref)
                .map(|edge| edge.to)
                .collect();

            plan.stats.added += desired.difference(&current).count();
            plan.stats.removed += current.difference(&desired).count();
            plan.replacements.push(RelationReplacement {
                vendor,
                account_id: account_id.to_string(),
                owner: owner_ref,
                targets: desired.into_iter().collect(),
            });
        }

        Ok(plan)
    }

    /// Recompute and store the edges of `owners`
    pub async fn reconcile(
        &self,
        vendor: Vendor,
        account_id: &str,
        owners: &[CloudResource],
    ) -> Result<RelationStats> {
        let plan = self.plan(vendor, account_id, owners).await?;
        self.store
            .apply(WriteBatch {
                relations: plan.replacements,
                ..WriteBatch::default()
            })
            .await?;
        tracing::debug!(
            vendor = %vendor,
            account_id = %account_id,
            added = plan.stats.added,
            removed = plan.stats.removed,
            "reconciled relations"
        );
        Ok(plan.stats)
    }

    /// Re-query the owners from the provider, then reconcile
    ///
    /// Owners the provider no longer reports lose all their edges.
    pub async fn reconcile_from_provider(
        &self,
        provider: &dyn ResourceProvider,
        filter: &ListFilter,
        cloud_ids: &[String],
    ) -> Result<RelationStats> {
        if !filter.resource_type.owns_relations() || cloud_ids.is_empty() {
            return Ok(RelationStats::default());
        }

        let mut owners = Vec::with_capacity(cloud_ids.len());
        for chunk in cloud_ids.chunks(provider.vendor().query_limit().max(1)) {
            owners.extend(provider.get_resource_state(filter, chunk).await?);
        }
        for id in cloud_ids {
            if !owners.iter().any(|owner| owner.cloud_id == *id) {
                owners.push(CloudResource::new(filter.resource_type, id.clone()));
            }
        }

        self.reconcile(provider.vendor(), &filter.account_id, &owners).await
    }
}
