use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::application::repos::{ProductsRepo, ProductsWriteRepo, RepoError};
use crate::domain::products::{Product, ProductUpdate};

use super::PostgresRepositories;
use super::util::{like_prefix_pattern, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: i64,
    name: String,
    description: Option<String>,
    price: Decimal,
    category: String,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            price: row.price,
            category: row.category,
        }
    }
}

#[async_trait]
impl ProductsRepo for PostgresRepositories {
    async fn list_by_category_prefix(
        &self,
        category: &str,
        limit: u32,
    ) -> Result<Vec<Product>, RepoError> {
        let rows = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, name, description, price, category
            FROM products
            WHERE category LIKE $1 ESCAPE '\'
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(like_prefix_pattern(category))
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Product::from).collect())
    }
}

#[async_trait]
impl ProductsWriteRepo for PostgresRepositories {
    async fn update_product(&self, id: i64, update: &ProductUpdate) -> Result<Product, RepoError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            UPDATE products
            SET name = $2, description = $3, price = $4, category = $5
            WHERE id = $1
            RETURNING id, name, description, price, category
            "#,
        )
        .bind(id)
        .bind(update.name())
        .bind(update.description())
        .bind(update.price())
        .bind(update.category())
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(Product::from).ok_or(RepoError::NotFound)
    }
}
