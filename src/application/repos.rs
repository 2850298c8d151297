//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::products::{Product, ProductUpdate};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Read side of the catalogue: the query the cache layer wraps.
///
/// Implementations return products whose category starts with `category`
/// (case-sensitive), ordered by id and bounded by `limit`.
#[async_trait]
pub trait ProductsRepo: Send + Sync {
    async fn list_by_category_prefix(
        &self,
        category: &str,
        limit: u32,
    ) -> Result<Vec<Product>, RepoError>;
}

#[async_trait]
pub trait ProductsWriteRepo: Send + Sync {
    /// Overwrite the mutable columns of product `id`.
    ///
    /// Returns `RepoError::NotFound` when no row has that id.
    async fn update_product(&self, id: i64, update: &ProductUpdate) -> Result<Product, RepoError>;
}
