//! Product reads through the cache and the writes that invalidate it.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::application::repos::{ProductsWriteRepo, RepoError};
use crate::cache::{
    CacheError, CacheOrchestrator, CacheRequest, EvictionCoordinator, EvictionPartialFailure,
    EvictionReport, QueryOutcome, Strategy,
};
use crate::domain::error::DomainError;
use crate::domain::products::{Product, ProductUpdate, ProductUpdateInput};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Eviction(#[from] EvictionPartialFailure),
}

/// A committed update together with the result of the eviction that followed it.
#[derive(Debug)]
pub struct UpdateOutcome {
    pub product: Product,
    pub eviction: Result<EvictionReport, EvictionPartialFailure>,
}

#[derive(Clone)]
pub struct CatalogService {
    cache: Arc<CacheOrchestrator>,
    writer: Arc<dyn ProductsWriteRepo>,
    eviction: Arc<EvictionCoordinator>,
}

impl CatalogService {
    pub fn new(cache: Arc<CacheOrchestrator>, writer: Arc<dyn ProductsWriteRepo>) -> Self {
        let eviction = Arc::new(EvictionCoordinator::new(cache.stores()));
        Self {
            cache,
            writer,
            eviction,
        }
    }

    pub fn cache(&self) -> &CacheOrchestrator {
        &self.cache
    }

    pub async fn products(
        &self,
        strategy: Strategy,
        category: &str,
        limit: u32,
        request: &CacheRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome, CatalogError> {
        self.cache
            .execute(strategy, category, limit, request, cancel)
            .await
            .map_err(CatalogError::from)
    }

    /// Validate and persist an update, then evict every cached result that
    /// could contain the product.
    ///
    /// Eviction failures do not undo the write; they are reported alongside it.
    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        id: i64,
        input: ProductUpdateInput,
    ) -> Result<UpdateOutcome, CatalogError> {
        let update = ProductUpdate::try_from(input)?;

        let mut guard = InvalidationGuard::arm(Arc::clone(&self.eviction), id);
        let product = match self.writer.update_product(id, &update).await {
            Ok(product) => product,
            Err(RepoError::NotFound) => {
                guard.disarm();
                return Err(DomainError::not_found("product", id).into());
            }
            Err(err) => return Err(err.into()),
        };

        let eviction = self.eviction.invalidate(Some(id)).await;
        guard.disarm();

        match &eviction {
            Ok(report) => info!(
                product_id = id,
                evicted = report.evicted,
                "Product updated and cache invalidated"
            ),
            Err(failure) => warn!(
                product_id = id,
                failed = failure.failures.len(),
                error = %failure,
                "Product updated but cache eviction was incomplete"
            ),
        }

        Ok(UpdateOutcome { product, eviction })
    }

    /// Evict every cached product result from every store.
    pub async fn clear_cache(&self) -> Result<EvictionReport, CatalogError> {
        Ok(self.eviction.invalidate(None).await?)
    }
}

/// Finishes an invalidation on a background task when the update future is
/// dropped between starting the write and completing the eviction.
struct InvalidationGuard {
    eviction: Arc<EvictionCoordinator>,
    product_id: i64,
    armed: bool,
}

impl InvalidationGuard {
    fn arm(eviction: Arc<EvictionCoordinator>, product_id: i64) -> Self {
        Self {
            eviction,
            product_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InvalidationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                product_id = self.product_id,
                "Update abandoned outside a runtime; cache invalidation skipped"
            );
            return;
        };
        let eviction = Arc::clone(&self.eviction);
        let product_id = self.product_id;
        handle.spawn(async move {
            if let Err(failure) = eviction.invalidate(Some(product_id)).await {
                warn!(product_id, error = %failure, "Deferred cache invalidation failed");
            }
        });
    }
}
