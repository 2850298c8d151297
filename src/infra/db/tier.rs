//! Postgres-backed shared tier for the layered strategy.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use time::OffsetDateTime;
use tracing::debug;

use crate::cache::{CacheEntry, CacheError, CacheKey, EntityTag, SharedTier, Tag};
use crate::domain::products::Product;

const STORE: &str = "layered.l2.postgres";

#[derive(sqlx::FromRow)]
struct CacheEntryRow {
    cache_key: String,
    payload: Json<Vec<Product>>,
    tags: Vec<String>,
    validator: Option<String>,
    created_at: OffsetDateTime,
    fresh_until: OffsetDateTime,
    expires_at: OffsetDateTime,
}

impl From<CacheEntryRow> for CacheEntry {
    fn from(row: CacheEntryRow) -> Self {
        Self {
            key: CacheKey::from_stored(row.cache_key),
            payload: row.payload.0.into(),
            created_at: row.created_at,
            fresh_until: row.fresh_until,
            expires_at: row.expires_at,
            tags: row.tags.into_iter().map(Tag::new).collect(),
            validator: row.validator.as_deref().and_then(EntityTag::parse),
        }
    }
}

/// Entries live in the `cache_entries` table; every process pointed at the
/// same database shares them.
#[derive(Clone)]
pub struct PostgresTier {
    pool: Arc<PgPool>,
}

impl PostgresTier {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Remove rows past hard expiry; returns how many were dropped.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= $1")
            .bind(OffsetDateTime::now_utc())
            .execute(&*self.pool)
            .await
            .map_err(|err| CacheError::store(STORE, err))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SharedTier for PostgresTier {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        let row = sqlx::query_as::<_, CacheEntryRow>(
            r#"
            SELECT cache_key, payload, tags, validator, created_at, fresh_until, expires_at
            FROM cache_entries
            WHERE cache_key = $1 AND expires_at > $2
            "#,
        )
        .bind(key.as_str())
        .bind(OffsetDateTime::now_utc())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|err| CacheError::store(STORE, err))?;

        Ok(row.map(|row| Arc::new(CacheEntry::from(row))))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let tags: Vec<String> = entry.tags.iter().map(ToString::to_string).collect();
        sqlx::query(
            r#"
            INSERT INTO cache_entries
                (cache_key, payload, tags, validator, created_at, fresh_until, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (cache_key) DO UPDATE
            SET payload = EXCLUDED.payload,
                tags = EXCLUDED.tags,
                validator = EXCLUDED.validator,
                created_at = EXCLUDED.created_at,
                fresh_until = EXCLUDED.fresh_until,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(entry.key.as_str())
        .bind(Json(&*entry.payload))
        .bind(tags)
        .bind(entry.validator.as_ref().map(ToString::to_string))
        .bind(entry.created_at)
        .bind(entry.fresh_until)
        .bind(entry.expires_at)
        .execute(&*self.pool)
        .await
        .map_err(|err| CacheError::store(STORE, err))?;
        Ok(())
    }

    async fn evict_tags(&self, tags: &BTreeSet<Tag>) -> Result<usize, CacheError> {
        let tags: Vec<String> = tags.iter().map(ToString::to_string).collect();
        let result = sqlx::query("DELETE FROM cache_entries WHERE tags && $1")
            .bind(&tags)
            .execute(&*self.pool)
            .await
            .map_err(|err| CacheError::store(STORE, err))?;

        let removed = usize::try_from(result.rows_affected()).unwrap_or(usize::MAX);
        debug!(tags = %tags.join(","), removed, "Shared tier rows evicted");
        Ok(removed)
    }
}
