//! Cache key definitions.
//!
//! Defines the strategy selector, the `CacheKey` derived from a product query
//! and the `Tag` labels used for invalidation.

use std::fmt;
use std::str::FromStr;

use super::error::CacheError;

/// Message returned to callers that omit the category filter.
pub const CATEGORY_REQUIRED: &str = "Category parameter is required";

const PRODUCTS_TAG: &str = "products";
const KEY_NAMESPACE: &str = "products";

/// One caching policy in front of the product query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strategy {
    /// Every request reaches the backend.
    None,
    /// Response headers let clients and proxies cache; the server keeps nothing.
    ClientDirected,
    /// Server-held output cache with tag eviction.
    ServerSide,
    /// In-process L1 in front of a shared L2 with single-flight population.
    Layered,
    /// Entity-tag validation answered with `304 Not Modified`.
    Conditional,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::None,
        Strategy::ClientDirected,
        Strategy::ServerSide,
        Strategy::Layered,
        Strategy::Conditional,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::None => "none",
            Strategy::ClientDirected => "clientdirected",
            Strategy::ServerSide => "serverside",
            Strategy::Layered => "layered",
            Strategy::Conditional => "conditional",
        }
    }

    /// Resolve a URL path segment, accepting the short aliases used by the demo UI.
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        let normalized = segment.trim().to_ascii_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "none" | "nocache" => Some(Strategy::None),
            "clientdirected" | "client" | "responsecache" => Some(Strategy::ClientDirected),
            "serverside" | "outputcache" => Some(Strategy::ServerSide),
            "layered" | "hybrid" | "hybridcache" => Some(Strategy::Layered),
            "conditional" | "etag" => Some(Strategy::Conditional),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = CacheError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Strategy::from_path_segment(value)
            .ok_or_else(|| CacheError::invalid_query(format!("unknown caching strategy `{value}`")))
    }
}

/// Identity of one cached product query.
///
/// The full category is kept verbatim as the last component so that two
/// categories can never share a key, whatever characters they contain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild a key read back from a shared tier.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for a category query under `strategy`.
///
/// Pure: no I/O and no shared state. Blank categories and a zero limit are rejected.
pub fn build_key(strategy: Strategy, category: &str, limit: u32) -> Result<CacheKey, CacheError> {
    if category.trim().is_empty() {
        return Err(CacheError::invalid_query(CATEGORY_REQUIRED));
    }
    if limit == 0 {
        return Err(CacheError::invalid_query("limit must be greater than zero"));
    }

    Ok(CacheKey(format!(
        "{KEY_NAMESPACE}:{strategy}:limit={limit}:category={category}"
    )))
}

/// Invalidation label attached to cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    /// Carried by every entry of the product query family.
    pub fn products() -> Self {
        Self(PRODUCTS_TAG.to_string())
    }

    /// Carried by entries whose result contains product `id`.
    pub fn product(id: i64) -> Self {
        Self(format!("{PRODUCTS_TAG}:{id}"))
    }

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
