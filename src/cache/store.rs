//! Cache entries and the storage contract shared by every strategy.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::domain::products::Product;

use super::error::CacheError;
use super::keys::{CacheKey, Strategy, Tag};
use super::validator::{EntityTag, IfNoneMatch};

/// Monotonic eviction counter of a store.
///
/// A population captures the epoch before querying the backend; if an
/// eviction ran in the meantime the epochs differ and the result is served
/// to its caller without being stored.
pub type Epoch = u64;

/// Where an entry stands relative to its expiry instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Past soft expiry; only served when the backend cannot answer.
    Stale,
    Expired,
}

/// One cached query result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Arc<[Product]>,
    pub created_at: OffsetDateTime,
    pub fresh_until: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub tags: BTreeSet<Tag>,
    pub validator: Option<EntityTag>,
}

impl CacheEntry {
    /// Materialize a draft; `fresh_for` must not exceed `expire_after`.
    pub fn from_draft(
        draft: &EntryDraft,
        now: OffsetDateTime,
        fresh_for: Duration,
        expire_after: Duration,
    ) -> Self {
        Self {
            key: draft.key.clone(),
            payload: Arc::clone(&draft.payload),
            created_at: now,
            fresh_until: now + fresh_for,
            expires_at: now + expire_after.max(fresh_for),
            tags: draft.tags.clone(),
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: EntityTag) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn freshness_at(&self, now: OffsetDateTime) -> Freshness {
        if now >= self.expires_at {
            Freshness::Expired
        } else if now >= self.fresh_until {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.freshness_at(now) == Freshness::Expired
    }
}

/// A freshly loaded result on its way into a store.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub key: CacheKey,
    pub payload: Arc<[Product]>,
    pub tags: BTreeSet<Tag>,
    pub ttl: Duration,
    /// Store epoch observed before the backend was queried.
    pub epoch: Epoch,
}

/// Request-scoped inputs that influence lookup and storage.
#[derive(Debug, Clone, Default)]
pub struct CacheRequest {
    pub if_none_match: Option<IfNoneMatch>,
    /// Skip server-side lookup and storage for this request only.
    pub bypass: bool,
}

/// Result of probing a store.
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(Arc<CacheEntry>),
    /// Soft-expired entry kept as a fallback while a refresh is attempted.
    Stale(Arc<CacheEntry>),
    NotModified(EntityTag),
    Miss,
}

/// Response headers a strategy wants attached to a successful read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseDirectives {
    pub cache_control: Option<String>,
    pub vary: Option<&'static str>,
    pub etag: Option<EntityTag>,
}

/// Key → entry storage with a strategy-specific expiry and promotion policy.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    fn strategy(&self) -> Strategy;

    /// Stable identity used in logs, metrics and eviction reports.
    fn name(&self) -> &'static str;

    async fn lookup(&self, key: &CacheKey, request: &CacheRequest) -> Result<Lookup, CacheError>;

    /// Persist a loaded result and return the entry to serve.
    ///
    /// Stores that keep nothing, or that observe an epoch newer than the
    /// draft's, return a transient entry without persisting it.
    async fn store(
        &self,
        draft: EntryDraft,
        request: &CacheRequest,
    ) -> Result<Arc<CacheEntry>, CacheError>;

    /// Remove every entry carrying any of `tags`; returns the number removed.
    async fn evict(&self, tags: &BTreeSet<Tag>) -> Result<usize, CacheError>;

    fn epoch(&self) -> Epoch;

    fn directives(&self, _entry: &CacheEntry) -> ResponseDirectives {
        ResponseDirectives::default()
    }

    /// Whether concurrent misses on one key share a single backend call.
    fn single_flight(&self) -> bool {
        false
    }
}
