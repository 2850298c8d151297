//! Shared second tier of the layered strategy.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use super::error::CacheError;
use super::keys::{CacheKey, Tag};
use super::registry::TagIndex;
use super::store::CacheEntry;

/// Distributed key → entry tier shared by every process of a deployment.
///
/// Implementations must make `evict_tags` atomic with respect to their own
/// `put`; the layered store serializes its own writes against eviction.
#[async_trait]
pub trait SharedTier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return the entry for `key` unless it is past hard expiry.
    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheError>;

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Remove every entry carrying any of `tags`; returns the number removed.
    async fn evict_tags(&self, tags: &BTreeSet<Tag>) -> Result<usize, CacheError>;
}

/// In-process stand-in for a shared tier.
pub struct MemoryTier {
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    tags: TagIndex,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            tags: TagIndex::new("layered.l2"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        let now = OffsetDateTime::now_utc();
        let entry = self.entries.get(key).map(|entry| Arc::clone(entry.value()));
        match entry {
            Some(entry) if entry.is_expired_at(now) => {
                self.entries.remove_if(key, |_, current| Arc::ptr_eq(current, &entry));
                self.tags.untag(key);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.tags.tag(entry.key.clone(), &entry.tags);
        self.entries
            .insert(entry.key.clone(), Arc::new(entry.clone()));
        Ok(())
    }

    async fn evict_tags(&self, tags: &BTreeSet<Tag>) -> Result<usize, CacheError> {
        let removed = self
            .tags
            .take_tagged(tags)
            .into_iter()
            .filter(|key| self.entries.remove(key).is_some())
            .count();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::keys::{Strategy, build_key};
    use crate::cache::store::EntryDraft;
    use crate::domain::products::Product;

    fn entry(category: &str, ids: &[i64], ttl: Duration) -> CacheEntry {
        let mut tags: BTreeSet<Tag> = ids.iter().copied().map(Tag::product).collect();
        tags.insert(Tag::products());
        let draft = EntryDraft {
            key: build_key(Strategy::Layered, category, 100).unwrap(),
            payload: Arc::from(Vec::<Product>::new()),
            tags,
            ttl,
            epoch: 0,
        };
        CacheEntry::from_draft(&draft, OffsetDateTime::now_utc(), ttl, ttl)
    }

    #[tokio::test]
    async fn put_get_and_evict_by_tag() {
        let tier = MemoryTier::new();
        let tools = entry("Tools", &[1], Duration::from_secs(60));
        let books = entry("Books", &[2], Duration::from_secs(60));
        tier.put(&tools).await.unwrap();
        tier.put(&books).await.unwrap();

        assert!(tier.get(&tools.key).await.unwrap().is_some());

        let removed = tier
            .evict_tags(&[Tag::product(1)].into_iter().collect())
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(tier.get(&tools.key).await.unwrap().is_none());
        assert!(tier.get(&books.key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_absent() {
        let tier = MemoryTier::new();
        let gone = entry("Tools", &[1], Duration::ZERO);
        tier.put(&gone).await.unwrap();

        assert!(tier.get(&gone.key).await.unwrap().is_none());
        assert!(tier.is_empty());
    }
}
