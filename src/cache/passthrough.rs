//! Strategies that keep no server-side state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use super::error::CacheError;
use super::keys::{CacheKey, Strategy, Tag};
use super::store::{
    CacheEntry, CacheRequest, Epoch, EntryDraft, Lookup, ResponseDirectives, StrategyStore,
};

/// Every request reaches the backend and nothing is remembered.
#[derive(Debug, Default)]
pub struct NoneStore;

#[async_trait]
impl StrategyStore for NoneStore {
    fn strategy(&self) -> Strategy {
        Strategy::None
    }

    fn name(&self) -> &'static str {
        "none"
    }

    async fn lookup(&self, _key: &CacheKey, _request: &CacheRequest) -> Result<Lookup, CacheError> {
        Ok(Lookup::Miss)
    }

    async fn store(
        &self,
        draft: EntryDraft,
        _request: &CacheRequest,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        Ok(Arc::new(CacheEntry::from_draft(
            &draft,
            OffsetDateTime::now_utc(),
            Duration::ZERO,
            Duration::ZERO,
        )))
    }

    async fn evict(&self, _tags: &BTreeSet<Tag>) -> Result<usize, CacheError> {
        Ok(0)
    }

    fn epoch(&self) -> Epoch {
        0
    }
}

/// Delegates caching to clients and intermediaries through response headers.
#[derive(Debug)]
pub struct ClientDirectedStore {
    max_age: Duration,
}

impl ClientDirectedStore {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }
}

#[async_trait]
impl StrategyStore for ClientDirectedStore {
    fn strategy(&self) -> Strategy {
        Strategy::ClientDirected
    }

    fn name(&self) -> &'static str {
        "clientdirected"
    }

    async fn lookup(&self, _key: &CacheKey, _request: &CacheRequest) -> Result<Lookup, CacheError> {
        Ok(Lookup::Miss)
    }

    async fn store(
        &self,
        draft: EntryDraft,
        _request: &CacheRequest,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        // The entry only carries the lifetime advertised to clients.
        Ok(Arc::new(CacheEntry::from_draft(
            &draft,
            OffsetDateTime::now_utc(),
            self.max_age,
            self.max_age,
        )))
    }

    async fn evict(&self, _tags: &BTreeSet<Tag>) -> Result<usize, CacheError> {
        Ok(0)
    }

    fn epoch(&self) -> Epoch {
        0
    }

    fn directives(&self, _entry: &CacheEntry) -> ResponseDirectives {
        ResponseDirectives {
            cache_control: Some(format!("public, max-age={}", self.max_age.as_secs())),
            vary: Some("Accept-Encoding"),
            etag: None,
        }
    }
}
