//! Deterministic catalogue generation for demo and load-test databases.

use rust_decimal::Decimal;
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::domain::products::Product;

use super::PostgresRepositories;

pub const CATEGORIES: [&str; 17] = [
    "Electronics",
    "Clothing",
    "Home & Kitchen",
    "Books",
    "Sports",
    "Toys",
    "Beauty",
    "Automotive",
    "Health",
    "Garden",
    "Furniture",
    "Jewelry",
    "Office",
    "Food",
    "Tools",
    "Baby",
    "Pet Supplies",
];

pub const SEED_BATCH_SIZE: usize = 5_000;
const SEED_RNG: u64 = 0x5EED_CA7A_1096;

/// Outcome of a seeding run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The table already held rows and was left untouched.
    Skipped { existing: i64 },
    Inserted { rows: usize },
}

/// Generates the same catalogue for the same `count` on every run.
pub struct CatalogueGenerator {
    rng: fastrand::Rng,
    next_index: usize,
    count: usize,
}

impl CatalogueGenerator {
    pub fn new(count: usize) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(SEED_RNG),
            next_index: 0,
            count,
        }
    }

    /// Next batch of at most `size` products; ids are left to the database.
    pub fn next_batch(&mut self, size: usize) -> Vec<Product> {
        let end = (self.next_index + size).min(self.count);
        let batch = (self.next_index..end)
            .map(|index| {
                let number = index + 1;
                // Uniform in [1.00, 2000.00].
                let cents = self.rng.i64(100..=200_000);
                Product {
                    id: 0,
                    name: format!("Product {number}"),
                    description: Some(format!("Description for product {number}")),
                    price: Decimal::new(cents, 2),
                    category: CATEGORIES[self.rng.usize(..CATEGORIES.len())].to_string(),
                }
            })
            .collect();
        self.next_index = end;
        batch
    }
}

impl PostgresRepositories {
    /// Fill an empty `products` table with `count` generated rows.
    pub async fn seed_products(&self, count: usize) -> Result<SeedOutcome, sqlx::Error> {
        let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products")
            .fetch_one(self.pool())
            .await?;
        if existing > 0 {
            info!(existing, "Products table already populated; skipping seed");
            return Ok(SeedOutcome::Skipped { existing });
        }

        info!(count, batch_size = SEED_BATCH_SIZE, "Seeding products");
        let mut generator = CatalogueGenerator::new(count);
        let mut inserted = 0;
        loop {
            let batch = generator.next_batch(SEED_BATCH_SIZE);
            if batch.is_empty() {
                break;
            }

            let mut builder: QueryBuilder<'_, Postgres> =
                QueryBuilder::new("INSERT INTO products (name, description, price, category) ");
            builder.push_values(&batch, |mut row, product| {
                row.push_bind(&product.name)
                    .push_bind(&product.description)
                    .push_bind(product.price)
                    .push_bind(&product.category);
            });

            let mut tx = self.begin().await?;
            builder.build().execute(&mut *tx).await?;
            tx.commit().await?;

            inserted += batch.len();
            debug!(inserted, count, "Seed batch committed");
        }

        info!(rows = inserted, "Seeding completed");
        Ok(SeedOutcome::Inserted { rows: inserted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic_and_bounded() {
        let first = CatalogueGenerator::new(12).next_batch(SEED_BATCH_SIZE);
        let second = CatalogueGenerator::new(12).next_batch(SEED_BATCH_SIZE);
        assert_eq!(first, second);
        assert_eq!(first.len(), 12);
        assert_eq!(first[0].name, "Product 1");

        for product in &first {
            assert!(CATEGORIES.contains(&product.category.as_str()));
            assert!(product.price >= Decimal::ONE);
            assert!(product.price <= Decimal::new(2000, 0));
            assert!(product.price.scale() <= 2);
        }
    }

    #[test]
    fn batches_partition_the_count() {
        let mut generator = CatalogueGenerator::new(12_001);
        let sizes: Vec<usize> = std::iter::from_fn(|| {
            let batch = generator.next_batch(SEED_BATCH_SIZE);
            (!batch.is_empty()).then_some(batch.len())
        })
        .collect();
        assert_eq!(sizes, vec![5_000, 5_000, 2_001]);
    }
}
