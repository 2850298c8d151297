//! In-process product catalogue for tests and the `--in-memory` demo mode.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::application::repos::{ProductsRepo, ProductsWriteRepo, RepoError};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::products::{Product, ProductUpdate};
use crate::infra::db::CatalogueGenerator;

const STORE: &str = "in_memory_catalogue";

/// Products keyed by id, so prefix scans come back in id order.
#[derive(Debug, Default)]
pub struct InMemoryProducts {
    rows: RwLock<BTreeMap<i64, Product>>,
}

impl InMemoryProducts {
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            rows: RwLock::new(
                products
                    .into_iter()
                    .map(|product| (product.id, product))
                    .collect(),
            ),
        }
    }

    /// The generated demo catalogue with ids `1..=count`.
    pub fn generated(count: usize) -> Self {
        let products = CatalogueGenerator::new(count)
            .next_batch(count)
            .into_iter()
            .zip(1_i64..)
            .map(|(product, id)| Product { id, ..product });
        Self::new(products)
    }

    /// Insert or overwrite a row without going through validation.
    pub fn replace(&self, product: Product) {
        rw_write(&self.rows, STORE, "replace").insert(product.id, product);
    }

    pub fn len(&self) -> usize {
        rw_read(&self.rows, STORE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProductsRepo for InMemoryProducts {
    async fn list_by_category_prefix(
        &self,
        category: &str,
        limit: u32,
    ) -> Result<Vec<Product>, RepoError> {
        let rows = rw_read(&self.rows, STORE, "list_by_category_prefix");
        Ok(rows
            .values()
            .filter(|product| product.category.starts_with(category))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProductsWriteRepo for InMemoryProducts {
    async fn update_product(&self, id: i64, update: &ProductUpdate) -> Result<Product, RepoError> {
        let mut rows = rw_write(&self.rows, STORE, "update_product");
        let row = rows.get_mut(&id).ok_or(RepoError::NotFound)?;
        *row = update.apply_to(id);
        Ok(row.clone())
    }
}
