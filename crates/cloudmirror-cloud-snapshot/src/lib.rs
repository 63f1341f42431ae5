//! Inventory snapshot provider for CloudMirror
//!
//! This crate implements the `ResourceProvider` trait over a directory of
//! JSON inventory files, so accounts exported from any of the supported
//! vendors can be mirrored without live credentials.
//!
//! # Layout
//!
//! ```text
//! <root>/<vendor>/<account>/<region>/<resource_type>.json
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cloudmirror_cloud::{ResourceProvider, Vendor};
//! use cloudmirror_cloud_snapshot::SnapshotProvider;
//!
//! let provider = SnapshotProvider::new("./inventory", Vendor::Aws);
//!
//! let auth = provider.check_auth("123456789012").await?;
//! if !auth.authenticated {
//!     panic!("Not available: {:?}", auth.error);
//! }
//! ```

pub mod error;
pub mod provider;
pub mod snapshot;

pub use error::{Result, SnapshotError};
pub use provider::SnapshotProvider;
pub use snapshot::Snapshot;
