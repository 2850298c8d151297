//! Errors raised by the cache orchestration layer.

use std::fmt;

use thiserror::Error;

use super::keys::Strategy;

/// Failure of a single read through the cache.
///
/// `Clone` because one population result is handed to every caller that
/// joined the same in-flight load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("{0}")]
    InvalidQuery(String),
    #[error("no store is registered for strategy `{0}`")]
    StrategyUnavailable(Strategy),
    #[error("query backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("query cancelled before the backend answered")]
    Cancelled,
    #[error("cache store `{store}` failed: {message}")]
    Store {
        store: &'static str,
        message: String,
    },
}

impl CacheError {
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    pub fn backend(err: impl fmt::Display) -> Self {
        Self::BackendUnavailable(err.to_string())
    }

    pub fn store(store: &'static str, err: impl fmt::Display) -> Self {
        Self::Store {
            store,
            message: err.to_string(),
        }
    }
}

/// One store that could not drop the requested tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionFailure {
    pub store: &'static str,
    pub tags: Vec<String>,
    pub message: String,
}

impl fmt::Display for EvictionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.store,
            self.tags.join(", "),
            self.message
        )
    }
}

/// Aggregate of every store that failed during one invalidation pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "cache eviction failed for {} of {attempted} stores: {}",
    .failures.len(),
    render_failures(.failures)
)]
pub struct EvictionPartialFailure {
    pub attempted: usize,
    pub failures: Vec<EvictionFailure>,
}

impl EvictionPartialFailure {
    /// True when no store managed to evict.
    pub fn is_total(&self) -> bool {
        self.failures.len() == self.attempted
    }
}

fn render_failures(failures: &[EvictionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
