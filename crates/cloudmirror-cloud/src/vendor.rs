//! Supported cloud vendors and their listing characteristics

use crate::error::CloudError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Cloud vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// Tencent Cloud
    TCloud,
    /// Amazon Web Services
    Aws,
    /// Huawei Cloud
    HuaWei,
    /// Google Cloud Platform
    Gcp,
    /// Microsoft Azure
    Azure,
}

/// How a vendor's list APIs paginate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// `offset` + `limit`
    Offset,
    /// Opaque `nextToken` / `pageToken`
    Token,
    /// Absolute `nextLink` URL
    SelfLink,
}

impl Vendor {
    pub const ALL: [Vendor; 5] = [
        Vendor::TCloud,
        Vendor::Aws,
        Vendor::HuaWei,
        Vendor::Gcp,
        Vendor::Azure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::TCloud => "tcloud",
            Vendor::Aws => "aws",
            Vendor::HuaWei => "huawei",
            Vendor::Gcp => "gcp",
            Vendor::Azure => "azure",
        }
    }

    /// Largest page the vendor's list APIs accept
    pub fn max_page_size(&self) -> u32 {
        match self {
            Vendor::TCloud => 100,
            Vendor::Aws => 1000,
            Vendor::HuaWei => 1000,
            Vendor::Gcp => 500,
            Vendor::Azure => 1000,
        }
    }

    /// Largest number of IDs accepted by a single describe/get call
    pub fn query_limit(&self) -> usize {
        match self {
            Vendor::TCloud => 100,
            Vendor::Aws => 1000,
            Vendor::HuaWei => 100,
            Vendor::Gcp => 500,
            Vendor::Azure => 100,
        }
    }

    pub fn pagination(&self) -> PaginationStyle {
        match self {
            Vendor::TCloud | Vendor::HuaWei => PaginationStyle::Offset,
            Vendor::Aws | Vendor::Gcp => PaginationStyle::Token,
            Vendor::Azure => PaginationStyle::SelfLink,
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcloud" | "tencent" => Ok(Vendor::TCloud),
            "aws" => Ok(Vendor::Aws),
            "huawei" => Ok(Vendor::HuaWei),
            "gcp" => Ok(Vendor::Gcp),
            "azure" => Ok(Vendor::Azure),
            other => Err(CloudError::InvalidParameter(format!(
                "vendor: {} not support",
                other
            ))),
        }
    }
}
