//! Conditional-request validation.
//!
//! Only the last known entity tag per key is kept. A client presenting a
//! matching `If-None-Match` is answered without touching the backend; any
//! other request repopulates and records a fresh tag. Tags are evicted with
//! the same tag labels as payload entries so that a write can never leave a
//! validator vouching for outdated data.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;

use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::{CacheKey, Strategy, Tag};
use super::lock::rw_write;
use super::metric_names::{METRIC_CAPACITY_EVICT_TOTAL, METRIC_TAG_EVICT_TOTAL};
use super::registry::TagIndex;
use super::store::{
    CacheEntry, CacheRequest, Epoch, EntryDraft, Lookup, ResponseDirectives, StrategyStore,
};
use super::validator::EntityTag;

const SOURCE: &str = "conditional";

#[derive(Debug, Clone)]
struct ValidatorRecord {
    etag: EntityTag,
    expires_at: OffsetDateTime,
}

pub struct ConditionalStore {
    ttl: Duration,
    validators: RwLock<LruCache<CacheKey, ValidatorRecord>>,
    tags: TagIndex,
    epoch: AtomicU64,
}

impl ConditionalStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: config
                .ttl(Strategy::Conditional)
                .unwrap_or(Duration::from_secs(1)),
            validators: RwLock::new(LruCache::new(config.validator_capacity_non_zero())),
            tags: TagIndex::new(SOURCE),
            epoch: AtomicU64::new(0),
        }
    }

    /// Entity tag currently vouched for under `key`.
    pub fn current(&self, key: &CacheKey) -> Option<EntityTag> {
        let now = OffsetDateTime::now_utc();
        rw_write(&self.validators, SOURCE, "current")
            .get(key)
            .filter(|record| record.expires_at > now)
            .map(|record| record.etag.clone())
    }
}

#[async_trait]
impl StrategyStore for ConditionalStore {
    fn strategy(&self) -> Strategy {
        Strategy::Conditional
    }

    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn lookup(&self, key: &CacheKey, request: &CacheRequest) -> Result<Lookup, CacheError> {
        let Some(if_none_match) = &request.if_none_match else {
            return Ok(Lookup::Miss);
        };

        let now = OffsetDateTime::now_utc();
        let mut validators = rw_write(&self.validators, SOURCE, "lookup");
        let Some(record) = validators.get(key).cloned() else {
            return Ok(Lookup::Miss);
        };

        if record.expires_at <= now {
            validators.pop(key);
            self.tags.untag(key);
            return Ok(Lookup::Miss);
        }

        if if_none_match.matches(&record.etag) {
            Ok(Lookup::NotModified(record.etag))
        } else {
            Ok(Lookup::Miss)
        }
    }

    async fn store(
        &self,
        draft: EntryDraft,
        _request: &CacheRequest,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        let etag = EntityTag::for_payload(&draft.payload);
        let entry = Arc::new(
            CacheEntry::from_draft(&draft, OffsetDateTime::now_utc(), self.ttl, self.ttl)
                .with_validator(etag.clone()),
        );

        let mut validators = rw_write(&self.validators, SOURCE, "store");
        if self.epoch.load(Ordering::Acquire) != draft.epoch {
            debug!(
                cache = SOURCE,
                key = %draft.key,
                "Eviction ran during population; validator not recorded"
            );
            return Ok(entry);
        }

        self.tags.tag(draft.key.clone(), &entry.tags);
        let record = ValidatorRecord {
            etag,
            expires_at: entry.expires_at,
        };
        if let Some((evicted, _)) = validators.push(draft.key.clone(), record)
            && evicted != draft.key
        {
            self.tags.untag(&evicted);
            counter!(METRIC_CAPACITY_EVICT_TOTAL, "store" => SOURCE).increment(1);
        }

        Ok(entry)
    }

    async fn evict(&self, tags: &BTreeSet<Tag>) -> Result<usize, CacheError> {
        let mut validators = rw_write(&self.validators, SOURCE, "evict");
        self.epoch.fetch_add(1, Ordering::AcqRel);

        let removed = self
            .tags
            .take_tagged(tags)
            .into_iter()
            .filter(|key| validators.pop(key).is_some())
            .count();

        counter!(METRIC_TAG_EVICT_TOTAL, "store" => SOURCE).increment(removed as u64);
        Ok(removed)
    }

    fn epoch(&self) -> Epoch {
        self.epoch.load(Ordering::Acquire)
    }

    fn directives(&self, entry: &CacheEntry) -> ResponseDirectives {
        ResponseDirectives {
            cache_control: None,
            vary: None,
            etag: entry.validator.clone(),
        }
    }
}
