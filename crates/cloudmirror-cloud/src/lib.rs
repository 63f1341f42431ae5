//! CloudMirror cloud provider abstraction
//!
//! This crate defines the capability every vendor adapter exposes to the
//! sync core: listing resources page by page, describing the state of
//! specific resources, and submitting asynchronous operations.
//!
//! # Supported Vendors
//!
//! - **TCloud**, **HuaWei**: offset pagination
//! - **AWS**, **GCP**: token pagination
//! - **Azure**: self-link pagination
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 cloudmirror CLI                  │
//! │               (sync / status / wait)             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                cloudmirror-core                  │
//! │   poller · status · cursor · handler · gate      │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               cloudmirror-cloud                  │
//! │  trait ResourceProvider { ... }                  │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │   snapshot    │ │  vendor SDK   │
//! │   provider    │ │   adapters    │
//! └───────────────┘ └───────────────┘
//! ```

pub mod error;
pub mod operation;
pub mod provider;
pub mod resource;
pub mod vendor;

// Re-exports
pub use error::{CloudError, Result};
pub use operation::{BatchOperationResult, BatchSummary, Operation, OperationKind};
pub use provider::{
    AuthStatus, ListFilter, PageRequest, PageToken, ResourcePage, ResourceProvider, RetryConfig,
    with_retry,
};
pub use resource::{CloudResource, ResourceRef, ResourceType};
pub use vendor::{PaginationStyle, Vendor};
