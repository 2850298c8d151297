//! Strategy-parameterized read path.
//!
//! One orchestrator serves every strategy: it derives the key, consults the
//! selected store, populates on miss from the backend and records the tags
//! that later writes evict by.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::application::repos::ProductsRepo;
use crate::domain::products::Product;

use super::conditional::ConditionalStore;
use super::config::{CacheConfig, MAX_RESULTS};
use super::error::CacheError;
use super::flight::FlightGroup;
use super::keys::{CacheKey, Strategy, Tag, build_key};
use super::layered::LayeredStore;
use super::metric_names::{
    METRIC_BACKEND_CALL_TOTAL, METRIC_BACKEND_MS, METRIC_LOOKUP_TOTAL, METRIC_STALE_SERVED_TOTAL,
};
use super::passthrough::{ClientDirectedStore, NoneStore};
use super::server_side::ServerSideStore;
use super::store::{
    CacheEntry, CacheRequest, EntryDraft, Epoch, Lookup, ResponseDirectives, StrategyStore,
};
use super::tier::SharedTier;
use super::validator::EntityTag;

/// How a payload was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Hit,
    Miss,
    /// Soft-expired entry served because the backend could not answer.
    Stale,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Hit => "hit",
            Source::Miss => "miss",
            Source::Stale => "stale",
        }
    }
}

#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Payload {
        products: Arc<[Product]>,
        source: Source,
        directives: ResponseDirectives,
    },
    NotModified {
        etag: EntityTag,
    },
}

/// Tags recorded for a result: the family tag plus one per contained product.
pub fn derive_tags(products: &[Product]) -> BTreeSet<Tag> {
    let mut tags: BTreeSet<Tag> = products.iter().map(|product| Tag::product(product.id)).collect();
    tags.insert(Tag::products());
    tags
}

pub struct CacheOrchestrator {
    backend: Arc<dyn ProductsRepo>,
    stores: BTreeMap<Strategy, Arc<dyn StrategyStore>>,
    flights: FlightGroup,
    config: CacheConfig,
}

impl CacheOrchestrator {
    /// An orchestrator with no stores registered.
    pub fn new(backend: Arc<dyn ProductsRepo>, config: CacheConfig) -> Self {
        Self {
            backend,
            stores: BTreeMap::new(),
            flights: FlightGroup::new(),
            config,
        }
    }

    /// Register one store per strategy, the layered one in front of `l2`.
    pub fn with_default_stores(
        backend: Arc<dyn ProductsRepo>,
        config: CacheConfig,
        l2: Arc<dyn SharedTier>,
    ) -> Self {
        let max_age = config
            .ttl(Strategy::ClientDirected)
            .unwrap_or(Duration::ZERO);
        let server_side = Arc::new(ServerSideStore::new(&config));
        let layered = Arc::new(LayeredStore::new(&config, l2));
        let conditional = Arc::new(ConditionalStore::new(&config));

        Self::new(backend, config)
            .with_store(Arc::new(NoneStore))
            .with_store(Arc::new(ClientDirectedStore::new(max_age)))
            .with_store(server_side)
            .with_store(layered)
            .with_store(conditional)
    }

    /// Register `store` for its strategy, replacing any previous one.
    pub fn with_store(mut self, store: Arc<dyn StrategyStore>) -> Self {
        self.stores.insert(store.strategy(), store);
        self
    }

    /// Registered stores ordered by strategy.
    pub fn stores(&self) -> Vec<Arc<dyn StrategyStore>> {
        self.stores.values().cloned().collect()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn store_for(&self, strategy: Strategy) -> Result<Arc<dyn StrategyStore>, CacheError> {
        self.stores
            .get(&strategy)
            .cloned()
            .ok_or(CacheError::StrategyUnavailable(strategy))
    }

    /// Products in `category` through `strategy`, without request-scoped directives.
    pub async fn query(
        &self,
        strategy: Strategy,
        category: &str,
        limit: u32,
    ) -> Result<Arc<[Product]>, CacheError> {
        let request = CacheRequest::default();
        match self
            .execute(strategy, category, limit, &request, &CancellationToken::new())
            .await?
        {
            QueryOutcome::Payload { products, .. } => Ok(products),
            QueryOutcome::NotModified { .. } => Err(CacheError::store(
                strategy.as_str(),
                "validator answered a request that presented none",
            )),
        }
    }

    /// Full read path honouring validators, the bypass directive and cancellation.
    #[instrument(skip(self, request, cancel))]
    pub async fn execute(
        &self,
        strategy: Strategy,
        category: &str,
        limit: u32,
        request: &CacheRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome, CacheError> {
        let limit = limit.min(MAX_RESULTS);
        let key = build_key(strategy, category, limit)?;
        let store = self.store_for(strategy)?;

        let stale = match store.lookup(&key, request).await {
            Ok(Lookup::Hit(entry)) => {
                record_lookup(strategy, "hit");
                return Ok(payload(&*store, &entry, Source::Hit));
            }
            Ok(Lookup::NotModified(etag)) => {
                record_lookup(strategy, "not_modified");
                return Ok(QueryOutcome::NotModified { etag });
            }
            Ok(Lookup::Stale(entry)) => {
                record_lookup(strategy, "stale");
                Some(entry)
            }
            Ok(Lookup::Miss) => {
                record_lookup(strategy, if request.bypass { "bypass" } else { "miss" });
                None
            }
            Err(err) => {
                warn!(
                    cache = store.name(),
                    key = %key,
                    error = %err,
                    "Cache lookup failed; falling back to the backend"
                );
                record_lookup(strategy, "error");
                None
            }
        };

        let epoch = store.epoch();
        let job = PopulateJob {
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&store),
            key: key.clone(),
            category: category.to_string(),
            limit,
            ttl: self.config.ttl(strategy).unwrap_or(Duration::ZERO),
            timeout: self.config.backend_timeout(),
            request: request.clone(),
            epoch,
        };

        let populated = if store.single_flight() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CacheError::Cancelled),
                result = self.flights.run(&key, epoch, move || job.run()) => result,
            }
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CacheError::Cancelled),
                result = job.run() => result,
            }
        };

        let entry = match (populated, stale) {
            (Ok(entry), _) => entry,
            (Err(CacheError::BackendUnavailable(reason)), Some(stale))
                if !stale.is_expired_at(OffsetDateTime::now_utc()) =>
            {
                warn!(
                    cache = store.name(),
                    key = %key,
                    reason = %reason,
                    "Backend unavailable; serving stale entry"
                );
                counter!(METRIC_STALE_SERVED_TOTAL).increment(1);
                return Ok(payload(&*store, &stale, Source::Stale));
            }
            (Err(err), _) => return Err(err),
        };

        if let (Some(if_none_match), Some(etag)) = (&request.if_none_match, &entry.validator)
            && if_none_match.matches(etag)
        {
            debug!(key = %key, etag = %etag, "Fresh validator matches the client's");
            return Ok(QueryOutcome::NotModified { etag: etag.clone() });
        }

        Ok(payload(&*store, &entry, Source::Miss))
    }
}

fn record_lookup(strategy: Strategy, outcome: &'static str) {
    counter!(METRIC_LOOKUP_TOTAL, "strategy" => strategy.as_str(), "outcome" => outcome)
        .increment(1);
}

fn payload(store: &dyn StrategyStore, entry: &CacheEntry, source: Source) -> QueryOutcome {
    QueryOutcome::Payload {
        products: Arc::clone(&entry.payload),
        source,
        directives: store.directives(entry),
    }
}

/// Everything a population needs, owned so that it can outlive its first caller.
struct PopulateJob {
    backend: Arc<dyn ProductsRepo>,
    store: Arc<dyn StrategyStore>,
    key: CacheKey,
    category: String,
    limit: u32,
    ttl: Duration,
    timeout: Duration,
    request: CacheRequest,
    /// Store epoch observed before the backend is queried.
    epoch: Epoch,
}

impl PopulateJob {
    async fn run(self) -> Result<Arc<CacheEntry>, CacheError> {
        let strategy = self.store.strategy();
        let epoch = self.epoch;

        counter!(METRIC_BACKEND_CALL_TOTAL, "strategy" => strategy.as_str()).increment(1);
        let started_at = Instant::now();
        let fetched = tokio::time::timeout(
            self.timeout,
            self.backend
                .list_by_category_prefix(&self.category, self.limit),
        )
        .await;
        histogram!(METRIC_BACKEND_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        let mut products = match fetched {
            Ok(Ok(products)) => products,
            Ok(Err(err)) => return Err(CacheError::backend(err)),
            Err(_) => {
                return Err(CacheError::backend(format!(
                    "query exceeded {} ms",
                    self.timeout.as_millis()
                )));
            }
        };
        products.sort_by_key(|product| product.id);
        products.truncate(self.limit as usize);

        let draft = EntryDraft {
            key: self.key,
            tags: derive_tags(&products),
            payload: products.into(),
            ttl: self.ttl,
            epoch,
        };

        match self.store.store(draft.clone(), &self.request).await {
            Ok(entry) => Ok(entry),
            Err(err) => {
                warn!(
                    cache = self.store.name(),
                    key = %draft.key,
                    error = %err,
                    "Cache store failed; serving the loaded result uncached"
                );
                Ok(Arc::new(CacheEntry::from_draft(
                    &draft,
                    OffsetDateTime::now_utc(),
                    draft.ttl,
                    draft.ttl,
                )))
            }
        }
    }
}
