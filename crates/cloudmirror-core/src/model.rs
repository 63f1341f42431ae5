//! Local mirror data model

use chrono::{DateTime, Utc};
use cloudmirror_cloud::{CloudResource, ResourceRef, ResourceType, Vendor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unit of synchronization: vendor, account, resource type and optionally region
///
/// Account-level scopes (`region == None`) cover every region of the account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub vendor: Vendor,
    pub account_id: String,
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Scope {
    pub fn new(vendor: Vendor, account_id: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            vendor,
            account_id: account_id.into(),
            resource_type,
            region: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Whether a record belongs to this scope
    pub fn contains(&self, record: &LocalResourceRecord) -> bool {
        record.vendor == self.vendor
            && record.account_id == self.account_id
            && record.resource_type == self.resource_type
            && self
                .region
                .as_ref()
                .is_none_or(|region| *region == record.region)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.vendor, self.account_id, self.resource_type)?;
        if let Some(region) = &self.region {
            write!(f, "/{}", region)?;
        }
        Ok(())
    }
}

/// A provider resource identified across accounts and regions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncTarget {
    pub cloud_id: String,
    pub vendor: Vendor,
    pub account_id: String,
    pub region: String,
}

/// Identity of a local record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub vendor: Vendor,
    pub account_id: String,
    pub region: String,
    pub resource_type: ResourceType,
    pub cloud_id: String,
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.vendor, self.account_id, self.region, self.resource_type, self.cloud_id
        )
    }
}

/// Locally stored mirror of a cloud resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalResourceRecord {
    /// Local identifier, stable across updates
    pub local_id: String,

    pub cloud_id: String,
    pub vendor: Vendor,
    pub account_id: String,
    pub region: String,
    pub resource_type: ResourceType,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalResourceRecord {
    /// Mirror a resource observed for the first time
    pub fn from_cloud(
        vendor: Vendor,
        account_id: impl Into<String>,
        region: impl Into<String>,
        resource: &CloudResource,
    ) -> Self {
        let now = Utc::now();
        Self {
            local_id: uuid::Uuid::new_v4().to_string(),
            cloud_id: resource.cloud_id.clone(),
            vendor,
            account_id: account_id.into(),
            region: region.into(),
            resource_type: resource.resource_type,
            name: resource.name.clone(),
            status: resource.status.clone(),
            attributes: resource.attributes.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            vendor: self.vendor,
            account_id: self.account_id.clone(),
            region: self.region.clone(),
            resource_type: self.resource_type,
            cloud_id: self.cloud_id.clone(),
        }
    }

    pub fn to_ref(&self) -> ResourceRef {
        ResourceRef::new(self.resource_type, self.cloud_id.clone())
    }

    /// Whether the provider view differs from what is stored
    pub fn differs_from(&self, resource: &CloudResource) -> bool {
        self.name != resource.name
            || self.status != resource.status
            || self.attributes != resource.attributes
    }

    /// Take over provider attributes, keeping the local identity
    pub fn refresh_from(&mut self, resource: &CloudResource) {
        self.name = resource.name.clone();
        self.status = resource.status.clone();
        self.attributes = resource.attributes.clone();
        self.updated_at = Utc::now();
    }
}

/// Weak link between two mirrored resources of the same account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationEdge {
    pub vendor: Vendor,
    pub account_id: String,
    pub from: ResourceRef,
    pub to: ResourceRef,
}

impl RelationEdge {
    pub fn new(vendor: Vendor, account_id: impl Into<String>, from: ResourceRef, to: ResourceRef) -> Self {
        Self {
            vendor,
            account_id: account_id.into(),
            from,
            to,
        }
    }

    pub fn touches(&self, resource: &ResourceRef) -> bool {
        self.from == *resource || self.to == *resource
    }
}

impl std::fmt::Display for RelationEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(region: &str) -> LocalResourceRecord {
        let resource = CloudResource::new(ResourceType::Cvm, "ins-1").with_status("RUNNING");
        LocalResourceRecord::from_cloud(Vendor::TCloud, "acc-1", region, &resource)
    }

    #[test]
    fn test_scope_contains() {
        let account_scope = Scope::new(Vendor::TCloud, "acc-1", ResourceType::Cvm);
        let region_scope = account_scope.clone().with_region("ap-guangzhou");

        assert!(account_scope.contains(&record("ap-guangzhou")));
        assert!(account_scope.contains(&record("ap-shanghai")));
        assert!(region_scope.contains(&record("ap-guangzhou")));
        assert!(!region_scope.contains(&record("ap-shanghai")));
        assert!(!Scope::new(Vendor::Aws, "acc-1", ResourceType::Cvm).contains(&record("ap-guangzhou")));
    }

    #[test]
    fn test_scope_display() {
        let scope = Scope::new(Vendor::Gcp, "acc-9", ResourceType::Subnet).with_region("us-east1");
        assert_eq!(scope.to_string(), "gcp/acc-9/subnet/us-east1");
    }

    #[test]
    fn test_refresh_keeps_identity() {
        let mut rec = record("ap-guangzhou");
        let local_id = rec.local_id.clone();
        let stopped = CloudResource::new(ResourceType::Cvm, "ins-1").with_status("STOPPED");

        assert!(rec.differs_from(&stopped));
        rec.refresh_from(&stopped);
        assert!(!rec.differs_from(&stopped));
        assert_eq!(rec.local_id, local_id);
        assert_eq!(rec.key().to_string(), "tcloud:acc-1:ap-guangzhou:cvm:ins-1");
    }
}
