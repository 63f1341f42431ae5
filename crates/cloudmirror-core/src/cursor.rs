//! Paged listing over every vendor pagination style

use crate::error::{Result, SyncError};
use crate::model::Scope;
use cloudmirror_cloud::{
    CloudResource, ListFilter, PageRequest, PageToken, ResourceProvider, RetryConfig, with_retry,
};
use std::sync::Arc;

/// Page size used when the caller does not ask for one
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// One page returned by [`ResourceListCursor::next`]
#[derive(Debug, Clone, Default)]
pub struct CursorPage {
    pub items: Vec<CloudResource>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Fresh,
    Paging,
    Exhausted,
    Failed,
}

/// Walks a provider listing page by page
///
/// Offset, token and self-link pagination all look the same to the caller.
/// Any page error poisons the cursor: the listing can never be reported
/// complete afterwards, so nothing is deleted on the strength of it.
pub struct ResourceListCursor {
    provider: Arc<dyn ResourceProvider>,
    filter: ListFilter,
    page_size: u32,
    retry: RetryConfig,
    token: PageToken,
    seen_tokens: Vec<PageToken>,
    pages: usize,
    state: CursorState,
}

impl ResourceListCursor {
    /// `page_size` is clamped to the vendor's maximum
    pub fn new(provider: Arc<dyn ResourceProvider>, filter: ListFilter, page_size: u32) -> Self {
        let max = provider.vendor().max_page_size();
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE.min(max)
        } else {
            page_size.min(max)
        };
        Self {
            provider,
            filter,
            page_size,
            retry: RetryConfig::default(),
            token: PageToken::Start,
            seen_tokens: Vec::new(),
            pages: 0,
            state: CursorState::Fresh,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn filter(&self) -> &ListFilter {
        &self.filter
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// True only after the last page was returned without any error
    pub fn is_complete(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    pub fn is_poisoned(&self) -> bool {
        self.state == CursorState::Failed
    }

    /// Start over from the first page
    pub fn reset(&mut self) {
        self.token = PageToken::Start;
        self.seen_tokens.clear();
        self.pages = 0;
        self.state = CursorState::Fresh;
    }

    fn scope(&self) -> Scope {
        Scope::new(
            self.provider.vendor(),
            &self.filter.account_id,
            self.filter.resource_type,
        )
        .with_region(&self.filter.region)
    }

    fn poison(&mut self, reason: impl Into<String>) -> SyncError {
        self.state = CursorState::Failed;
        SyncError::ListingIncomplete {
            scope: self.scope(),
            reason: reason.into(),
        }
    }

    /// Fetch the next page
    ///
    /// After the last page, returns an empty page with `has_more == false`.
    pub async fn next(&mut self) -> Result<CursorPage> {
        match self.state {
            CursorState::Exhausted => return Ok(CursorPage::default()),
            CursorState::Failed => {
                return Err(self.poison("cursor already failed"));
            }
            CursorState::Fresh | CursorState::Paging => {}
        }

        let request = PageRequest {
            token: self.token.clone(),
            limit: self.page_size,
        };
        let what = format!("list {} page {}", self.filter.resource_type, self.pages + 1);
        let provider = Arc::clone(&self.provider);
        let filter = &self.filter;

        let page = match with_retry(&self.retry, &what, || provider.list_resources(filter, &request)).await {
            Ok(page) => page,
            Err(e) => {
                self.state = CursorState::Failed;
                return Err(e.into());
            }
        };

        self.pages += 1;
        tracing::debug!(
            vendor = %self.provider.vendor(),
            region = %self.filter.region,
            resource_type = %self.filter.resource_type,
            page = self.pages,
            items = page.items.len(),
            "listed page"
        );

        let next = match page.next {
            Some(next) if !page.items.is_empty() => next,
            _ => {
                self.state = CursorState::Exhausted;
                return Ok(CursorPage {
                    items: page.items,
                    has_more: false,
                });
            }
        };

        if next == self.token || self.seen_tokens.contains(&next) {
            return Err(self.poison(format!(
                "provider returned continuation token {:?} twice",
                next
            )));
        }

        self.seen_tokens.push(self.token.clone());
        self.token = next;
        self.state = CursorState::Paging;
        Ok(CursorPage {
            items: page.items,
            has_more: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticProvider;
    use cloudmirror_cloud::{ResourceType, Vendor};

    fn filter() -> ListFilter {
        ListFilter::new("acc-1", "region-1", ResourceType::Cvm)
    }

    async fn drain(cursor: &mut ResourceListCursor) -> Result<Vec<usize>> {
        let mut sizes = Vec::new();
        loop {
            let page = cursor.next().await?;
            sizes.push(page.items.len());
            if !page.has_more {
                return Ok(sizes);
            }
        }
    }

    #[tokio::test]
    async fn test_every_pagination_style() {
        for vendor in Vendor::ALL {
            let provider = StaticProvider::new(vendor).with_resources(
                "acc-1",
                "region-1",
                (0..250).map(|i| CloudResource::new(ResourceType::Cvm, format!("ins-{}", i))),
            );
            let mut cursor = ResourceListCursor::new(Arc::new(provider), filter(), 100);
            let sizes = drain(&mut cursor).await.unwrap();
            assert_eq!(sizes, vec![100, 100, 50], "vendor {}", vendor);
            assert!(cursor.is_complete());
        }
    }

    #[tokio::test]
    async fn test_page_size_clamped_to_vendor_max() {
        let cursor = ResourceListCursor::new(Arc::new(StaticProvider::new(Vendor::TCloud)), filter(), 5000);
        assert_eq!(cursor.page_size(), 100);
        let cursor = ResourceListCursor::new(Arc::new(StaticProvider::new(Vendor::Gcp)), filter(), 5000);
        assert_eq!(cursor.page_size(), 500);
        let cursor = ResourceListCursor::new(Arc::new(StaticProvider::new(Vendor::Aws)), filter(), 0);
        assert_eq!(cursor.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn test_empty_listing_is_complete() {
        let mut cursor = ResourceListCursor::new(Arc::new(StaticProvider::new(Vendor::Azure)), filter(), 100);
        let page = cursor.next().await.unwrap();
        assert!(page.items.is_empty());
        assert!(!page.has_more);
        assert!(cursor.is_complete());
    }

    #[tokio::test]
    async fn test_page_error_poisons_cursor() {
        let provider = StaticProvider::new(Vendor::Aws)
            .with_resources(
                "acc-1",
                "region-1",
                (0..250).map(|i| CloudResource::new(ResourceType::Cvm, format!("ins-{}", i))),
            )
            .fail_list_page(2);
        let mut cursor = ResourceListCursor::new(Arc::new(provider), filter(), 100)
            .with_retry(RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            });

        assert!(cursor.next().await.unwrap().has_more);
        assert!(cursor.next().await.is_err());
        assert!(cursor.is_poisoned());
        assert!(cursor.next().await.is_err());
        assert!(!cursor.is_complete());

        cursor.reset();
        assert!(!cursor.is_poisoned());
    }

    #[tokio::test]
    async fn test_repeated_token_is_an_error() {
        let provider = StaticProvider::new(Vendor::Gcp)
            .with_resources(
                "acc-1",
                "region-1",
                (0..300).map(|i| CloudResource::new(ResourceType::Cvm, format!("ins-{}", i))),
            )
            .repeat_token();
        let mut cursor = ResourceListCursor::new(Arc::new(provider), filter(), 100);

        assert!(cursor.next().await.unwrap().has_more);
        let err = cursor.next().await.unwrap_err();
        assert!(matches!(err, SyncError::ListingIncomplete { .. }));
        assert!(!cursor.is_complete());
    }
}
