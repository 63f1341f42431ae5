//! Inventory snapshot directory
//!
//! Layout: `<root>/<vendor>/<account>/<region>/<resource_type>.json`, each
//! file holding a JSON array of resources in listing order.

use crate::error::{Result, SnapshotError};
use cloudmirror_cloud::{CloudResource, ResourceType, Vendor};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Reader/writer for one vendor's part of a snapshot directory
#[derive(Debug, Clone)]
pub struct Snapshot {
    root: PathBuf,
    vendor: Vendor,
}

impl Snapshot {
    pub fn new(root: impl AsRef<Path>, vendor: Vendor) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            vendor,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    pub fn account_dir(&self, account_id: &str) -> PathBuf {
        self.root.join(self.vendor.as_str()).join(account_id)
    }

    pub fn resource_path(
        &self,
        account_id: &str,
        region: &str,
        resource_type: ResourceType,
    ) -> PathBuf {
        self.account_dir(account_id)
            .join(region)
            .join(format!("{}.json", resource_type))
    }

    /// Fail unless the snapshot holds the account
    pub async fn check_account(&self, account_id: &str) -> Result<PathBuf> {
        if !fs::try_exists(&self.root).await? {
            return Err(SnapshotError::RootNotFound(self.root.clone()));
        }
        let dir = self.account_dir(account_id);
        if !fs::try_exists(&dir).await? {
            return Err(SnapshotError::AccountNotFound(account_id.to_string()));
        }
        Ok(dir)
    }

    /// Region directories of the account, sorted
    pub async fn regions(&self, account_id: &str) -> Result<Vec<String>> {
        let dir = self.check_account(account_id).await?;
        let mut regions = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                regions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        regions.sort();
        Ok(regions)
    }

    /// Resources of one type
    ///
    /// A missing type file is an empty inventory; a missing root or account
    /// is an error.
    pub async fn read(
        &self,
        account_id: &str,
        region: &str,
        resource_type: ResourceType,
    ) -> Result<Vec<CloudResource>> {
        self.check_account(account_id).await?;
        let path = self.resource_path(account_id, region, resource_type);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No snapshot file at {}", path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let resources: Vec<CloudResource> =
            serde_json::from_str(&content).map_err(|source| SnapshotError::Parse {
                path: path.clone(),
                source,
            })?;

        // The path decides the type
        Ok(resources
            .into_iter()
            .map(|mut resource| {
                resource.resource_type = resource_type;
                resource
            })
            .collect())
    }

    /// Replace the resources of one type
    pub async fn write(
        &self,
        account_id: &str,
        region: &str,
        resource_type: ResourceType,
        resources: &[CloudResource],
    ) -> Result<()> {
        let path = self.resource_path(account_id, region, resource_type);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(resources)?;
        fs::write(&path, content).await?;
        tracing::debug!("Wrote {} resources to {}", resources.len(), path.display());
        Ok(())
    }
}
