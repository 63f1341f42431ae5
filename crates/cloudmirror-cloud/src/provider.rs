//! Cloud provider capability trait definition

use crate::error::Result;
use crate::operation::{BatchOperationResult, Operation};
use crate::resource::{CloudResource, ResourceType};
use crate::vendor::Vendor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Cloud provider capability
///
/// Every vendor adapter (TCloud, AWS, HuaWei, GCP, Azure) implements this
/// trait. Request/response marshaling and retries of transient errors live in
/// the adapter; the sync core only sees resources, identifiers and errors.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Vendor served by this provider
    fn vendor(&self) -> Vendor;

    /// Provider name for logs (e.g. "tcloud-sdk", "snapshot")
    fn name(&self) -> &str;

    /// Check that credentials for the account are usable
    async fn check_auth(&self, account_id: &str) -> Result<AuthStatus>;

    /// List one page of resources matching the filter
    async fn list_resources(&self, filter: &ListFilter, page: &PageRequest) -> Result<ResourcePage>;

    /// Describe the current state of specific resources
    ///
    /// Resources unknown to the provider are simply absent from the result.
    async fn get_resource_state(
        &self,
        filter: &ListFilter,
        cloud_ids: &[String],
    ) -> Result<Vec<CloudResource>>;

    /// Submit an operation; returns the IDs it was applied to
    async fn submit_operation(&self, op: &Operation) -> Result<BatchOperationResult>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Selects resources of one kind in one account/region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    pub account_id: String,
    pub region: String,
    pub resource_type: ResourceType,
}

impl ListFilter {
    pub fn new(
        account_id: impl Into<String>,
        region: impl Into<String>,
        resource_type: ResourceType,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            resource_type,
        }
    }
}

/// Continuation point of a paged listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageToken {
    /// First page
    Start,
    /// Offset-based pagination (TCloud, HuaWei)
    Offset(u64),
    /// Opaque token pagination (AWS `NextToken`, GCP `pageToken`)
    Token(String),
    /// Self-link pagination (Azure `nextLink`)
    Link(String),
}

/// Page request passed to [`ResourceProvider::list_resources`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub token: PageToken,
    pub limit: u32,
}

impl PageRequest {
    pub fn first(limit: u32) -> Self {
        Self {
            token: PageToken::Start,
            limit,
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ResourcePage {
    pub items: Vec<CloudResource>,

    /// Where the next page starts; `None` when the listing is exhausted
    pub next: Option<PageToken>,
}

impl ResourcePage {
    pub fn last(items: Vec<CloudResource>) -> Self {
        Self { items, next: None }
    }

    pub fn with_next(items: Vec<CloudResource>, next: PageToken) -> Self {
        Self {
            items,
            next: Some(next),
        }
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following `attempt` (0-based), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

/// Run a provider call, retrying transient errors with exponential backoff
///
/// Non-transient errors are returned immediately. The last transient error is
/// returned once `max_attempts` is exhausted.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, what: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < config.max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    "{} failed with transient error (attempt {}), retrying in {:?}: {}",
                    what,
                    attempt + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
