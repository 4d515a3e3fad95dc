//! The `Provider` trait: what the engine expects from a Provider client.
//!
//! This crate defines only the trait surface (spec section 6, "Inward").
//! A concrete implementation (an `octocrab`/`reqwest`-backed client, say)
//! is an external collaborator wired in by the binary that uses this
//! engine; it is out of this spec's scope.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::model::{Notification, SubjectType};
use crate::ratelimit::RateLimitSnapshot;

/// Pagination metadata the Provider discloses on a list response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub next_page: Option<u32>,
    pub last_page: Option<u32>,
}

/// One page of Provider results plus the metadata needed to keep paging
/// and to stay under the rate limit.
#[derive(Debug, Clone)]
pub struct ProviderResponse<T> {
    pub items: Vec<T>,
    pub page_info: PageInfo,
    pub rate_limit: Option<RateLimitSnapshot>,
}

/// Options recognized by every list operation (spec section 6).
///
/// `build()`-style clamping happens in [`NotificationOptionsBuilder`]
/// rather than at fetcher call sites, so every caller gets the same
/// "default when ≤ 0" behavior spec sections 6 and 8 require.
#[derive(Debug, Clone)]
pub struct NotificationOptions {
    pub all: bool,
    pub unread: bool,
    pub repo_name: Option<String>,
    pub org_name: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub participating: bool,
    pub per_page: u32,
    pub page: u32,
    pub use_cache: bool,
    pub cache_ttl: Duration,
    pub max_concurrent: usize,
    pub filter_string: Option<String>,
}

impl Default for NotificationOptions {
    fn default() -> Self {
        NotificationOptionsBuilder::new().build()
    }
}

impl NotificationOptions {
    pub fn builder() -> NotificationOptionsBuilder {
        NotificationOptionsBuilder::new()
    }

    /// Returns a copy of `self` with `page` set, reusing every other
    /// option — the shape each concurrent page worker needs (spec 4.3
    /// step 4: "Each worker reuses the base options with page set").
    pub fn with_page(&self, page: u32) -> Self {
        let mut next = self.clone();
        next.page = page;
        next
    }
}

/// Builder for [`NotificationOptions`].
pub struct NotificationOptionsBuilder {
    all: bool,
    unread: bool,
    repo_name: Option<String>,
    org_name: Option<String>,
    since: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
    participating: bool,
    per_page: u32,
    page: u32,
    use_cache: bool,
    cache_ttl: Duration,
    max_concurrent: usize,
    filter_string: Option<String>,
}

impl Default for NotificationOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationOptionsBuilder {
    /// Creates a builder with spec-section-6 defaults: `per_page = 100`,
    /// `use_cache = true`, `cache_ttl = 5m`, `max_concurrent = 5`.
    pub fn new() -> Self {
        Self {
            all: false,
            unread: false,
            repo_name: None,
            org_name: None,
            since: None,
            before: None,
            participating: false,
            per_page: 100,
            page: 1,
            use_cache: true,
            cache_ttl: Duration::from_secs(5 * 60),
            max_concurrent: 5,
            filter_string: None,
        }
    }

    pub fn all(mut self, all: bool) -> Self {
        self.all = all;
        self
    }

    pub fn unread(mut self, unread: bool) -> Self {
        self.unread = unread;
        self
    }

    pub fn repo_name(mut self, repo_name: impl Into<String>) -> Self {
        self.repo_name = Some(repo_name.into());
        self
    }

    pub fn org_name(mut self, org_name: impl Into<String>) -> Self {
        self.org_name = Some(org_name.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    pub fn participating(mut self, participating: bool) -> Self {
        self.participating = participating;
        self
    }

    /// Clamped to the default (100) when `per_page == 0`.
    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Clamped to the default (5m) when `ttl.is_zero()`.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Clamped to the default (5) when `max_concurrent == 0`.
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn filter_string(mut self, filter_string: impl Into<String>) -> Self {
        self.filter_string = Some(filter_string.into());
        self
    }

    /// Applies every "default when ≤ 0" clamp from spec section 6 and
    /// builds the final, immutable options.
    pub fn build(self) -> NotificationOptions {
        NotificationOptions {
            all: self.all,
            unread: self.unread,
            repo_name: self.repo_name,
            org_name: self.org_name,
            since: self.since,
            before: self.before,
            participating: self.participating,
            per_page: if self.per_page == 0 { 100 } else { self.per_page },
            page: if self.page == 0 { 1 } else { self.page },
            use_cache: self.use_cache,
            cache_ttl: if self.cache_ttl.is_zero() {
                Duration::from_secs(5 * 60)
            } else {
                self.cache_ttl
            },
            max_concurrent: if self.max_concurrent == 0 { 5 } else { self.max_concurrent },
            filter_string: self.filter_string,
        }
    }
}

/// Requested change to a subscription (thread- or repository-scoped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub subscribed: bool,
    pub ignored: bool,
}

/// Everything the engine needs from a Provider client (spec section 6).
///
/// `Error` carries whatever the underlying transport raises; components
/// downstream classify it via a `RetryPolicy` (see `threadwatch-retry`)
/// and wrap it in [`crate::ThreadwatchError`].
#[async_trait]
pub trait Provider: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn list_notifications(
        &self,
        opts: &NotificationOptions,
    ) -> Result<ProviderResponse<Notification>, Self::Error>;

    async fn list_repository_notifications(
        &self,
        owner: &str,
        repo: &str,
        opts: &NotificationOptions,
    ) -> Result<ProviderResponse<Notification>, Self::Error>;

    async fn mark_thread_read(&self, notification_id: &str) -> Result<(), Self::Error>;

    async fn mark_notifications_read(&self, before: Option<DateTime<Utc>>) -> Result<(), Self::Error>;

    async fn mark_repository_notifications_read(
        &self,
        owner: &str,
        repo: &str,
        before: Option<DateTime<Utc>>,
    ) -> Result<(), Self::Error>;

    async fn set_thread_subscription(
        &self,
        notification_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<(), Self::Error>;

    async fn set_repository_subscription(
        &self,
        owner: &str,
        repo: &str,
        update: SubscriptionUpdate,
    ) -> Result<(), Self::Error>;

    /// Fetches the issue detail endpoint, returning a derived detail URL.
    async fn issue_detail(&self, owner: &str, repo: &str, number: &str) -> Result<String, Self::Error>;
    async fn pull_request_detail(&self, owner: &str, repo: &str, number: &str) -> Result<String, Self::Error>;
    async fn commit_detail(&self, owner: &str, repo: &str, sha: &str) -> Result<String, Self::Error>;
    async fn release_detail(&self, owner: &str, repo: &str, id: &str) -> Result<String, Self::Error>;
    async fn discussion_detail(&self, owner: &str, repo: &str, number: &str) -> Result<String, Self::Error>;
}

/// Dispatches to the right Provider detail endpoint for `subject_type`,
/// the branch spec section 4.5 describes ("branches on subject.type").
pub async fn fetch_detail_url<P: Provider>(
    provider: &P,
    owner: &str,
    repo: &str,
    subject_type: SubjectType,
    identifier: &str,
) -> Result<String, P::Error> {
    match subject_type {
        SubjectType::Issue => provider.issue_detail(owner, repo, identifier).await,
        SubjectType::PullRequest => provider.pull_request_detail(owner, repo, identifier).await,
        SubjectType::Commit => provider.commit_detail(owner, repo, identifier).await,
        SubjectType::Release => provider.release_detail(owner, repo, identifier).await,
        SubjectType::Discussion => provider.discussion_detail(owner, repo, identifier).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_per_page_and_concurrency_defaults() {
        let opts = NotificationOptions::builder().per_page(0).max_concurrent(0).build();
        assert_eq!(opts.per_page, 100);
        assert_eq!(opts.max_concurrent, 5);
    }

    #[test]
    fn builder_clamps_cache_ttl_default() {
        let opts = NotificationOptions::builder().cache_ttl(Duration::ZERO).build();
        assert_eq!(opts.cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn with_page_preserves_other_fields() {
        let opts = NotificationOptions::builder().org_name("acme").per_page(25).build();
        let paged = opts.with_page(3);
        assert_eq!(paged.page, 3);
        assert_eq!(paged.org_name.as_deref(), Some("acme"));
        assert_eq!(paged.per_page, 25);
    }
}
