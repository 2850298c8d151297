//! Two-level cache: a bounded in-process L1 in front of a shared L2.
//!
//! Lookups go L1 → L2 (promoting L2 hits into L1). Entries are fresh until
//! their TTL and remain servable as stale for the configured window after it,
//! which the orchestrator uses when a refresh fails. Population runs through
//! the orchestrator's single-flight group.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::{CacheKey, Strategy, Tag};
use super::lock::rw_write;
use super::metric_names::{METRIC_CAPACITY_EVICT_TOTAL, METRIC_TAG_EVICT_TOTAL};
use super::registry::TagIndex;
use super::store::{
    CacheEntry, CacheRequest, Epoch, EntryDraft, Freshness, Lookup, StrategyStore,
};
use super::tier::SharedTier;

const SOURCE: &str = "layered";
const L1_SOURCE: &str = "layered.l1";

pub struct LayeredStore {
    ttl: Duration,
    stale_window: Duration,
    l1: RwLock<LruCache<CacheKey, Arc<CacheEntry>>>,
    l1_tags: TagIndex,
    l2: Arc<dyn SharedTier>,
    /// Writers (store, promotion) hold it shared; eviction holds it exclusively.
    gate: AsyncRwLock<()>,
    epoch: AtomicU64,
}

impl LayeredStore {
    pub fn new(config: &CacheConfig, l2: Arc<dyn SharedTier>) -> Self {
        Self {
            ttl: config
                .ttl(Strategy::Layered)
                .unwrap_or(Duration::from_secs(1)),
            stale_window: config.stale_window(),
            l1: RwLock::new(LruCache::new(config.l1_capacity_non_zero())),
            l1_tags: TagIndex::new(L1_SOURCE),
            l2,
            gate: AsyncRwLock::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn l1_len(&self) -> usize {
        rw_write(&self.l1, L1_SOURCE, "len").len()
    }

    fn l1_get(&self, key: &CacheKey, now: OffsetDateTime) -> Option<Arc<CacheEntry>> {
        let mut l1 = rw_write(&self.l1, L1_SOURCE, "get");
        let entry = l1.get(key).cloned()?;
        if entry.is_expired_at(now) {
            l1.pop(key);
            self.l1_tags.untag(key);
            return None;
        }
        Some(entry)
    }

    fn l1_put(&self, entry: Arc<CacheEntry>) {
        let mut l1 = rw_write(&self.l1, L1_SOURCE, "put");
        self.l1_tags.tag(entry.key.clone(), &entry.tags);
        if let Some((evicted, _)) = l1.push(entry.key.clone(), Arc::clone(&entry))
            && evicted != entry.key
        {
            self.l1_tags.untag(&evicted);
            counter!(METRIC_CAPACITY_EVICT_TOTAL, "store" => L1_SOURCE).increment(1);
        }
    }

    fn classify(entry: Arc<CacheEntry>, now: OffsetDateTime) -> Lookup {
        match entry.freshness_at(now) {
            Freshness::Fresh => Lookup::Hit(entry),
            Freshness::Stale => Lookup::Stale(entry),
            Freshness::Expired => Lookup::Miss,
        }
    }
}

#[async_trait]
impl StrategyStore for LayeredStore {
    fn strategy(&self) -> Strategy {
        Strategy::Layered
    }

    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn lookup(&self, key: &CacheKey, _request: &CacheRequest) -> Result<Lookup, CacheError> {
        let now = OffsetDateTime::now_utc();
        if let Some(entry) = self.l1_get(key, now) {
            return Ok(Self::classify(entry, now));
        }

        let observed = self.epoch.load(Ordering::Acquire);
        let entry = match self.l2.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(Lookup::Miss),
            Err(err) => {
                warn!(
                    cache = SOURCE,
                    tier = self.l2.name(),
                    key = %key,
                    error = %err,
                    "Shared tier lookup failed; treating as miss"
                );
                return Ok(Lookup::Miss);
            }
        };

        if entry.is_expired_at(now) {
            return Ok(Lookup::Miss);
        }

        {
            let _gate = self.gate.read().await;
            if self.epoch.load(Ordering::Acquire) != observed {
                // An eviction ran while L2 answered; the entry may predate it.
                return Ok(Lookup::Miss);
            }
            self.l1_put(Arc::clone(&entry));
        }

        Ok(Self::classify(entry, now))
    }

    async fn store(
        &self,
        draft: EntryDraft,
        _request: &CacheRequest,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        let entry = Arc::new(CacheEntry::from_draft(
            &draft,
            OffsetDateTime::now_utc(),
            self.ttl,
            self.ttl + self.stale_window,
        ));

        let _gate = self.gate.read().await;
        if self.epoch.load(Ordering::Acquire) != draft.epoch {
            debug!(
                cache = SOURCE,
                key = %draft.key,
                "Eviction ran during population; result not stored"
            );
            return Ok(entry);
        }

        if let Err(err) = self.l2.put(&entry).await {
            warn!(
                cache = SOURCE,
                tier = self.l2.name(),
                key = %draft.key,
                error = %err,
                "Shared tier write failed; keeping the entry in L1 only"
            );
        }
        self.l1_put(Arc::clone(&entry));

        Ok(entry)
    }

    async fn evict(&self, tags: &BTreeSet<Tag>) -> Result<usize, CacheError> {
        let _gate = self.gate.write().await;
        self.epoch.fetch_add(1, Ordering::AcqRel);

        let l1_removed = {
            let mut l1 = rw_write(&self.l1, L1_SOURCE, "evict");
            self.l1_tags
                .take_tagged(tags)
                .into_iter()
                .filter(|key| l1.pop(key).is_some())
                .count()
        };
        counter!(METRIC_TAG_EVICT_TOTAL, "store" => L1_SOURCE).increment(l1_removed as u64);

        let l2_removed = self
            .l2
            .evict_tags(tags)
            .await
            .map_err(|err| CacheError::store(SOURCE, format!("{}: {err}", self.l2.name())))?;
        counter!(METRIC_TAG_EVICT_TOTAL, "store" => SOURCE).increment(l2_removed as u64);

        Ok(l1_removed + l2_removed)
    }

    fn epoch(&self) -> Epoch {
        self.epoch.load(Ordering::Acquire)
    }

    fn single_flight(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::cache::keys::build_key;
    use crate::cache::tier::MemoryTier;
    use crate::domain::products::Product;

    struct BrokenTier;

    #[async_trait]
    impl SharedTier for BrokenTier {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, _key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheError> {
            Err(CacheError::store("broken", "connection refused"))
        }

        async fn put(&self, _entry: &CacheEntry) -> Result<(), CacheError> {
            Err(CacheError::store("broken", "connection refused"))
        }

        async fn evict_tags(&self, _tags: &BTreeSet<Tag>) -> Result<usize, CacheError> {
            Err(CacheError::store("broken", "connection refused"))
        }
    }

    fn key(category: &str) -> CacheKey {
        build_key(Strategy::Layered, category, 100).unwrap()
    }

    fn draft(store: &LayeredStore, category: &str, ids: &[i64]) -> EntryDraft {
        let mut tags: BTreeSet<Tag> = ids.iter().copied().map(Tag::product).collect();
        tags.insert(Tag::products());
        EntryDraft {
            key: key(category),
            payload: ids
                .iter()
                .map(|id| Product {
                    id: *id,
                    name: format!("Product {id}"),
                    description: None,
                    price: Decimal::ONE,
                    category: category.to_string(),
                })
                .collect(),
            tags,
            ttl: Duration::from_secs(60),
            epoch: store.epoch(),
        }
    }

    fn layered(config: &CacheConfig) -> (LayeredStore, Arc<MemoryTier>) {
        let l2 = Arc::new(MemoryTier::new());
        (LayeredStore::new(config, l2.clone()), l2)
    }

    #[tokio::test]
    async fn store_writes_both_tiers_and_hits() {
        let (store, l2) = layered(&CacheConfig::default());
        store
            .store(draft(&store, "Tools", &[1]), &CacheRequest::default())
            .await
            .unwrap();

        assert_eq!(store.l1_len(), 1);
        assert_eq!(l2.len(), 1);
        let lookup = store.lookup(&key("Tools"), &CacheRequest::default()).await.unwrap();
        assert!(matches!(lookup, Lookup::Hit(_)));
    }

    #[tokio::test]
    async fn l2_hit_is_promoted_into_l1() {
        let config = CacheConfig::default();
        let l2 = Arc::new(MemoryTier::new());
        let writer = LayeredStore::new(&config, l2.clone());
        let reader = LayeredStore::new(&config, l2.clone());

        writer
            .store(draft(&writer, "Tools", &[1]), &CacheRequest::default())
            .await
            .unwrap();
        assert_eq!(reader.l1_len(), 0);

        let lookup = reader.lookup(&key("Tools"), &CacheRequest::default()).await.unwrap();
        assert!(matches!(lookup, Lookup::Hit(_)));
        assert_eq!(reader.l1_len(), 1);
    }

    #[tokio::test]
    async fn soft_expired_entries_are_reported_stale() {
        let config = CacheConfig {
            layered_ttl_secs: 1,
            stale_window_secs: 600,
            ..Default::default()
        };
        let (store, _l2) = layered(&config);
        let stale = Arc::new(CacheEntry::from_draft(
            &draft(&store, "Tools", &[1]),
            OffsetDateTime::now_utc() - Duration::from_secs(5),
            Duration::from_secs(1),
            Duration::from_secs(601),
        ));
        store.l1_put(stale);

        let lookup = store.lookup(&key("Tools"), &CacheRequest::default()).await.unwrap();
        assert!(matches!(lookup, Lookup::Stale(_)));
    }

    #[tokio::test]
    async fn hard_expired_entries_are_absent() {
        let (store, _l2) = layered(&CacheConfig::default());
        let expired = Arc::new(CacheEntry::from_draft(
            &draft(&store, "Tools", &[1]),
            OffsetDateTime::now_utc() - Duration::from_secs(120),
            Duration::from_secs(10),
            Duration::from_secs(60),
        ));
        store.l1_put(expired);

        let lookup = store.lookup(&key("Tools"), &CacheRequest::default()).await.unwrap();
        assert!(matches!(lookup, Lookup::Miss));
        assert_eq!(store.l1_len(), 0);
    }

    #[tokio::test]
    async fn eviction_clears_both_tiers() {
        let (store, l2) = layered(&CacheConfig::default());
        let request = CacheRequest::default();
        store.store(draft(&store, "Tools", &[1]), &request).await.unwrap();
        store.store(draft(&store, "Books", &[2]), &request).await.unwrap();

        let removed = store
            .evict(&[Tag::product(1)].into_iter().collect())
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(l2.len(), 1);
        let tools = store.lookup(&key("Tools"), &request).await.unwrap();
        let books = store.lookup(&key("Books"), &request).await.unwrap();
        assert!(matches!(tools, Lookup::Miss));
        assert!(matches!(books, Lookup::Hit(_)));
    }

    #[tokio::test]
    async fn l1_capacity_is_lru_bounded() {
        let config = CacheConfig {
            l1_capacity: 1,
            ..Default::default()
        };
        let (store, l2) = layered(&config);
        let request = CacheRequest::default();
        store.store(draft(&store, "Tools", &[1]), &request).await.unwrap();
        store.store(draft(&store, "Books", &[2]), &request).await.unwrap();

        assert_eq!(store.l1_len(), 1);
        assert_eq!(l2.len(), 2);
        // Evicted from L1 but still served through L2.
        let tools = store.lookup(&key("Tools"), &request).await.unwrap();
        assert!(matches!(tools, Lookup::Hit(_)));
    }

    #[tokio::test]
    async fn broken_shared_tier_degrades_to_l1() {
        let store = LayeredStore::new(&CacheConfig::default(), Arc::new(BrokenTier));
        let request = CacheRequest::default();

        let miss = store.lookup(&key("Tools"), &request).await.unwrap();
        assert!(matches!(miss, Lookup::Miss));

        store.store(draft(&store, "Tools", &[1]), &request).await.unwrap();
        let hit = store.lookup(&key("Tools"), &request).await.unwrap();
        assert!(matches!(hit, Lookup::Hit(_)));

        let err = store
            .evict(&[Tag::products()].into_iter().collect())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Store { store: "layered", .. }));
        // L1 was still cleared.
        assert_eq!(store.l1_len(), 0);
    }

    #[tokio::test]
    async fn population_racing_an_eviction_is_not_stored() {
        let (store, l2) = layered(&CacheConfig::default());
        let stale_draft = draft(&store, "Tools", &[1]);
        store
            .evict(&[Tag::products()].into_iter().collect())
            .await
            .unwrap();

        store.store(stale_draft, &CacheRequest::default()).await.unwrap();
        assert_eq!(store.l1_len(), 0);
        assert!(l2.is_empty());
    }
}
