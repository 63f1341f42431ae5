//! Resource kinds and the provider-side view of a resource

use crate::error::CloudError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Kind of cloud resource mirrored locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Vpc,
    Subnet,
    SecurityGroup,
    RouteTable,
    Disk,
    Eip,
    NetworkInterface,
    Cvm,
}

impl ResourceType {
    /// Every resource type in dependency order
    pub const ALL: [ResourceType; 8] = [
        ResourceType::Vpc,
        ResourceType::Subnet,
        ResourceType::SecurityGroup,
        ResourceType::RouteTable,
        ResourceType::Disk,
        ResourceType::Eip,
        ResourceType::NetworkInterface,
        ResourceType::Cvm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Vpc => "vpc",
            ResourceType::Subnet => "subnet",
            ResourceType::SecurityGroup => "security_group",
            ResourceType::RouteTable => "route_table",
            ResourceType::Disk => "disk",
            ResourceType::Eip => "eip",
            ResourceType::NetworkInterface => "network_interface",
            ResourceType::Cvm => "cvm",
        }
    }

    /// Resource types that must be mirrored before this one
    pub fn depends_on(&self) -> &'static [ResourceType] {
        match self {
            ResourceType::Vpc => &[],
            ResourceType::Subnet => &[ResourceType::Vpc],
            ResourceType::SecurityGroup => &[ResourceType::Vpc],
            ResourceType::RouteTable => &[ResourceType::Vpc, ResourceType::Subnet],
            ResourceType::Disk => &[],
            ResourceType::Eip => &[],
            ResourceType::NetworkInterface => &[ResourceType::Subnet, ResourceType::SecurityGroup],
            ResourceType::Cvm => &[
                ResourceType::Subnet,
                ResourceType::SecurityGroup,
                ResourceType::Disk,
                ResourceType::Eip,
                ResourceType::NetworkInterface,
            ],
        }
    }

    /// Position in the global sync order
    pub fn sync_rank(&self) -> usize {
        ResourceType::ALL
            .iter()
            .position(|t| t == self)
            .unwrap_or(ResourceType::ALL.len())
    }

    /// Whether this type owns relation edges to other resources
    pub fn owns_relations(&self) -> bool {
        matches!(self, ResourceType::Cvm)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "vpc" => Ok(ResourceType::Vpc),
            "subnet" => Ok(ResourceType::Subnet),
            "security_group" | "sg" => Ok(ResourceType::SecurityGroup),
            "route_table" => Ok(ResourceType::RouteTable),
            "disk" => Ok(ResourceType::Disk),
            "eip" => Ok(ResourceType::Eip),
            "network_interface" | "nic" => Ok(ResourceType::NetworkInterface),
            "cvm" | "vm" | "instance" => Ok(ResourceType::Cvm),
            other => Err(CloudError::InvalidParameter(format!(
                "unknown resource type: {}",
                other
            ))),
        }
    }
}

/// Reference to a resource by kind and cloud ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_type: ResourceType,
    pub cloud_id: String,
}

impl ResourceRef {
    pub fn new(resource_type: ResourceType, cloud_id: impl Into<String>) -> Self {
        Self {
            resource_type,
            cloud_id: cloud_id.into(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.cloud_id)
    }
}

/// A resource as reported by a provider's list or describe API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudResource {
    /// Provider-assigned identifier
    pub cloud_id: String,

    pub resource_type: ResourceType,

    #[serde(default)]
    pub name: String,

    /// Provider state string (e.g. "RUNNING", "PENDING", "available")
    #[serde(default)]
    pub status: Option<String>,

    /// Last operation error reported by the provider, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,

    /// Vendor-specific attributes (CIDR, zone, instance type, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// Resources this one is attached to, as currently reported by the provider
    #[serde(default)]
    pub relations: Vec<ResourceRef>,
}

impl CloudResource {
    pub fn new(resource_type: ResourceType, cloud_id: impl Into<String>) -> Self {
        Self {
            cloud_id: cloud_id.into(),
            resource_type,
            name: String::new(),
            status: None,
            status_message: None,
            attributes: BTreeMap::new(),
            relations: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_relation(mut self, resource_type: ResourceType, cloud_id: impl Into<String>) -> Self {
        self.relations.push(ResourceRef::new(resource_type, cloud_id));
        self
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn to_ref(&self) -> ResourceRef {
        ResourceRef::new(self.resource_type, self.cloud_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_precede_dependents() {
        for ty in ResourceType::ALL {
            for dep in ty.depends_on() {
                assert!(
                    dep.sync_rank() < ty.sync_rank(),
                    "{} must sync before {}",
                    dep,
                    ty
                );
            }
        }
    }

    #[test]
    fn test_resource_type_parse() {
        assert_eq!("security-group".parse::<ResourceType>().unwrap(), ResourceType::SecurityGroup);
        assert_eq!("CVM".parse::<ResourceType>().unwrap(), ResourceType::Cvm);
        assert!("bucket".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_cloud_resource_builder() {
        let cvm = CloudResource::new(ResourceType::Cvm, "ins-1")
            .with_name("web-01")
            .with_status("RUNNING")
            .with_attribute("zone", serde_json::json!("ap-guangzhou-3"))
            .with_relation(ResourceType::Disk, "disk-1");

        assert_eq!(cvm.get_attribute::<String>("zone").as_deref(), Some("ap-guangzhou-3"));
        assert_eq!(cvm.relations, vec![ResourceRef::new(ResourceType::Disk, "disk-1")]);
        assert_eq!(cvm.to_ref().to_string(), "cvm:ins-1");
    }

    #[test]
    fn test_cloud_resource_deserialize_defaults() {
        let json = r#"{"cloud_id": "vpc-1", "resource_type": "vpc"}"#;
        let vpc: CloudResource = serde_json::from_str(json).unwrap();
        assert!(vpc.attributes.is_empty());
        assert!(vpc.relations.is_empty());
        assert_eq!(vpc.status, None);
    }
}
