//! Server-held output cache.
//!
//! Entries are partitioned by policy id, bounded by an LRU capacity and
//! removed by tag. A request carrying the bypass directive neither reads nor
//! writes the cache, and existing entries are left in place.

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
use super::store::{CacheEntry, CacheRequest, Epoch, EntryDraft, Lookup, StrategyStore};

const SOURCE: &str = "serverside";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OutputKey {
    policy: Arc<str>,
    key: CacheKey,
}

pub struct ServerSideStore {
    policy: Arc<str>,
    ttl: Duration,
    entries: RwLock<LruCache<OutputKey, Arc<CacheEntry>>>,
    tags: TagIndex,
    epoch: AtomicU64,
}

impl ServerSideStore {
    pub fn new(config: &CacheConfig) -> Self {
        let ttl = config
            .ttl(Strategy::ServerSide)
            .unwrap_or(Duration::from_secs(1));
        Self {
            policy: Arc::from(config.server_side_policy.as_str()),
            ttl,
            entries: RwLock::new(LruCache::new(config.server_side_capacity_non_zero())),
            tags: TagIndex::new(SOURCE),
            epoch: AtomicU64::new(0),
        }
    }

    fn output_key(&self, key: &CacheKey) -> OutputKey {
        OutputKey {
            policy: Arc::clone(&self.policy),
            key: key.clone(),
        }
    }

    /// Number of live or not-yet-purged entries.
    pub fn len(&self) -> usize {
        rw_write(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tags
    }
}

#[async_trait]
impl StrategyStore for ServerSideStore {
    fn strategy(&self) -> Strategy {
        Strategy::ServerSide
    }

    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn lookup(&self, key: &CacheKey, request: &CacheRequest) -> Result<Lookup, CacheError> {
        if request.bypass {
            return Ok(Lookup::Miss);
        }

        let now = OffsetDateTime::now_utc();
        let output_key = self.output_key(key);
        let mut entries = rw_write(&self.entries, SOURCE, "lookup");
        let Some(entry) = entries.get(&output_key).cloned() else {
            return Ok(Lookup::Miss);
        };

        if entry.is_expired_at(now) {
            entries.pop(&output_key);
            self.tags.untag(key);
            return Ok(Lookup::Miss);
        }

        Ok(Lookup::Hit(entry))
    }

    async fn store(
        &self,
        draft: EntryDraft,
        request: &CacheRequest,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        let entry = Arc::new(CacheEntry::from_draft(
            &draft,
            OffsetDateTime::now_utc(),
            self.ttl,
            self.ttl,
        ));
        if request.bypass {
            return Ok(entry);
        }

        let output_key = self.output_key(&draft.key);
        let mut entries = rw_write(&self.entries, SOURCE, "store");
        if self.epoch.load(Ordering::Acquire) != draft.epoch {
            debug!(
                cache = SOURCE,
                key = %draft.key,
                "Eviction ran during population; result not stored"
            );
            return Ok(entry);
        }

        // Tagged before it becomes visible.
        self.tags.tag(draft.key.clone(), &entry.tags);
        if let Some((evicted, _)) = entries.push(output_key.clone(), Arc::clone(&entry))
            && evicted != output_key
        {
            self.tags.untag(&evicted.key);
            counter!(METRIC_CAPACITY_EVICT_TOTAL, "store" => SOURCE).increment(1);
        }

        Ok(entry)
    }

    async fn evict(&self, tags: &BTreeSet<Tag>) -> Result<usize, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "evict");
        self.epoch.fetch_add(1, Ordering::AcqRel);

        let mut removed = 0;
        for key in self.tags.take_tagged(tags) {
            if entries.pop(&self.output_key(&key)).is_some() {
                removed += 1;
            }
        }

        counter!(METRIC_TAG_EVICT_TOTAL, "store" => SOURCE).increment(removed as u64);
        Ok(removed)
    }

    fn epoch(&self) -> Epoch {
        self.epoch.load(Ordering::Acquire)
    }
}
