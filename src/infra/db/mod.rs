//! Postgres-backed repository implementations.

mod products;
mod seed;
mod tier;
mod util;

pub use seed::{CATEGORIES, CatalogueGenerator, SEED_BATCH_SIZE, SeedOutcome};
pub use tier::PostgresTier;
pub use util::{like_prefix_pattern, map_sqlx_error};

use std::sync::Arc;
use std::time::Duration;

use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};
use tracing::warn;

use crate::infra::error::redact_credentials;

/// Connection attempts made before startup gives up on the database.
pub const CONNECT_ATTEMPTS: u32 = 10;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    /// Connect, retrying with exponential backoff while the server comes up.
    pub async fn connect_with_retry(
        url: &str,
        max_connections: u32,
        attempts: u32,
    ) -> Result<PgPool, sqlx::Error> {
        let mut attempt = 1;
        loop {
            match Self::connect(url, max_connections).await {
                Ok(pool) => return Ok(pool),
                Err(err) if attempt < attempts => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        database = %redact_credentials(url),
                        attempt,
                        attempts,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "Database connection failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}

/// `2^attempt` seconds, capped at about a minute.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1_u64 << attempt.min(6))
}
