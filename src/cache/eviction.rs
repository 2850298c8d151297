//! Cross-store tag eviction triggered by writes.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use tracing::{info, instrument, warn};

use super::error::{EvictionFailure, EvictionPartialFailure};
use super::keys::Tag;
use super::metric_names::METRIC_EVICTION_FAILURE_TOTAL;
use super::store::StrategyStore;

/// Outcome of an eviction pass where every store succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    pub tags: Vec<String>,
    pub stores: usize,
    pub evicted: usize,
}

/// Evicts tags from every registered store, isolating per-store failures.
pub struct EvictionCoordinator {
    stores: Vec<Arc<dyn StrategyStore>>,
}

impl EvictionCoordinator {
    pub fn new(stores: Vec<Arc<dyn StrategyStore>>) -> Self {
        Self { stores }
    }

    /// Tags a product write invalidates.
    pub fn tags_for(product_id: Option<i64>) -> BTreeSet<Tag> {
        let mut tags = BTreeSet::from([Tag::products()]);
        if let Some(id) = product_id {
            tags.insert(Tag::product(id));
        }
        tags
    }

    /// Evict `products` everywhere, plus `products:{id}` when an id is given.
    #[instrument(skip(self))]
    pub async fn invalidate(
        &self,
        product_id: Option<i64>,
    ) -> Result<EvictionReport, EvictionPartialFailure> {
        self.evict_tags(&Self::tags_for(product_id)).await
    }

    pub async fn evict_tags(
        &self,
        tags: &BTreeSet<Tag>,
    ) -> Result<EvictionReport, EvictionPartialFailure> {
        let rendered: Vec<String> = tags.iter().map(ToString::to_string).collect();
        let outcomes = join_all(
            self.stores
                .iter()
                .map(|store| async move { (store.name(), store.evict(tags).await) }),
        )
        .await;

        let mut evicted = 0;
        let mut failures = Vec::new();
        for (store, outcome) in outcomes {
            match outcome {
                Ok(count) => evicted += count,
                Err(err) => {
                    warn!(
                        store,
                        tags = %rendered.join(","),
                        error = %err,
                        "Cache eviction failed for store"
                    );
                    counter!(METRIC_EVICTION_FAILURE_TOTAL, "store" => store).increment(1);
                    failures.push(EvictionFailure {
                        store,
                        tags: rendered.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(EvictionPartialFailure {
                attempted: self.stores.len(),
                failures,
            });
        }

        info!(
            tags = %rendered.join(","),
            stores = self.stores.len(),
            evicted,
            "Cache eviction completed"
        );
        Ok(EvictionReport {
            tags: rendered,
            stores: self.stores.len(),
            evicted,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::error::CacheError;
    use crate::cache::keys::{CacheKey, Strategy, build_key};
    use crate::cache::server_side::ServerSideStore;
    use crate::cache::store::{CacheEntry, CacheRequest, Epoch, EntryDraft, Lookup};
    use crate::domain::products::Product;

    struct FailingStore;

    #[async_trait]
    impl StrategyStore for FailingStore {
        fn strategy(&self) -> Strategy {
            Strategy::Layered
        }

        fn name(&self) -> &'static str {
            "failing"
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
                time::OffsetDateTime::now_utc(),
                draft.ttl,
                draft.ttl,
            )))
        }

        async fn evict(&self, _tags: &BTreeSet<Tag>) -> Result<usize, CacheError> {
            Err(CacheError::store("failing", "l2 unreachable"))
        }

        fn epoch(&self) -> Epoch {
            0
        }
    }

    async fn seeded_server_side(category: &str, id: i64) -> Arc<ServerSideStore> {
        let store = Arc::new(ServerSideStore::new(&CacheConfig::default()));
        let draft = EntryDraft {
            key: build_key(Strategy::ServerSide, category, 100).unwrap(),
            payload: vec![Product {
                id,
                name: "Widget".to_string(),
                description: None,
                price: Decimal::ONE,
                category: category.to_string(),
            }]
            .into(),
            tags: [Tag::products(), Tag::product(id)].into_iter().collect(),
            ttl: std::time::Duration::from_secs(60),
            epoch: store.epoch(),
        };
        store.store(draft, &CacheRequest::default()).await.unwrap();
        store
    }

    #[test]
    fn tags_for_product_write() {
        assert_eq!(
            EvictionCoordinator::tags_for(None),
            BTreeSet::from([Tag::products()])
        );
        assert_eq!(
            EvictionCoordinator::tags_for(Some(7)),
            BTreeSet::from([Tag::products(), Tag::product(7)])
        );
    }

    #[tokio::test]
    async fn invalidate_reaches_every_store() {
        let first = seeded_server_side("Tools", 1).await;
        let second = seeded_server_side("Books", 2).await;
        let coordinator = EvictionCoordinator::new(vec![first.clone(), second.clone()]);

        let report = coordinator.invalidate(Some(1)).await.unwrap();
        assert_eq!(report.stores, 2);
        assert_eq!(report.evicted, 2);
        assert!(first.is_empty());
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn failures_are_isolated_and_aggregated() {
        let healthy = seeded_server_side("Tools", 1).await;
        let coordinator =
            EvictionCoordinator::new(vec![Arc::new(FailingStore), healthy.clone()]);

        let failure = coordinator.invalidate(Some(1)).await.unwrap_err();
        assert_eq!(failure.attempted, 2);
        assert_eq!(failure.failures.len(), 1);
        assert_eq!(failure.failures[0].store, "failing");
        assert!(!failure.is_total());
        assert!(failure.to_string().contains("l2 unreachable"));
        // The healthy store still evicted.
        assert!(healthy.is_empty());
    }
}
