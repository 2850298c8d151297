//! Cache configuration.
//!
//! Controls per-strategy expiry, store capacities and the layered shared tier
//! via the `[cache]` section of the application settings.

use std::num::NonZeroUsize;
use std::time::Duration;

use super::keys::Strategy;

// Default values for cache configuration
const DEFAULT_CLIENT_DIRECTED_TTL_SECS: u64 = 60;
const DEFAULT_SERVER_SIDE_TTL_SECS: u64 = 60;
const DEFAULT_LAYERED_TTL_SECS: u64 = 300;
const DEFAULT_CONDITIONAL_TTL_SECS: u64 = 600;
const DEFAULT_SERVER_SIDE_CAPACITY: usize = 1024;
const DEFAULT_SERVER_SIDE_POLICY: &str = "products";
const DEFAULT_L1_CAPACITY: usize = 256;
const DEFAULT_VALIDATOR_CAPACITY: usize = 4096;
const DEFAULT_L2_ADDRESS: &str = "memory";
const DEFAULT_STALE_WINDOW_SECS: u64 = 300;
const DEFAULT_BYPASS_HEADER: &str = "cache-control";
const DEFAULT_BYPASS_VALUE: &str = "no-cache";
const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 5000;

/// Upper bound on the number of products any strategy returns.
pub const MAX_RESULTS: u32 = 100;

/// Cache configuration, built from the `[cache]` settings section.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// `max-age` advertised by the client-directed strategy.
    pub client_directed_ttl_secs: u64,
    /// Lifetime of server-side output entries.
    pub server_side_ttl_secs: u64,
    /// Soft expiry of layered entries.
    pub layered_ttl_secs: u64,
    /// Lifetime of remembered entity tags.
    pub conditional_ttl_secs: u64,
    /// Maximum entries in the server-side output cache.
    pub server_side_capacity: usize,
    /// Policy id the server-side store partitions its entries by.
    pub server_side_policy: String,
    /// Maximum entries in the layered in-process tier.
    pub l1_capacity: usize,
    /// Maximum validators remembered by the conditional store.
    pub validator_capacity: usize,
    /// `memory` or a `postgres://` URL for the shared tier.
    pub l2_address: String,
    /// How long past soft expiry a layered entry may still be served on backend failure.
    pub stale_window_secs: u64,
    /// Request header that disables server-side caching for one request.
    pub bypass_header: String,
    /// Substring of the bypass header value that triggers the bypass.
    pub bypass_value: String,
    /// Upper bound on a single backend query.
    pub backend_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            client_directed_ttl_secs: DEFAULT_CLIENT_DIRECTED_TTL_SECS,
            server_side_ttl_secs: DEFAULT_SERVER_SIDE_TTL_SECS,
            layered_ttl_secs: DEFAULT_LAYERED_TTL_SECS,
            conditional_ttl_secs: DEFAULT_CONDITIONAL_TTL_SECS,
            server_side_capacity: DEFAULT_SERVER_SIDE_CAPACITY,
            server_side_policy: DEFAULT_SERVER_SIDE_POLICY.to_string(),
            l1_capacity: DEFAULT_L1_CAPACITY,
            validator_capacity: DEFAULT_VALIDATOR_CAPACITY,
            l2_address: DEFAULT_L2_ADDRESS.to_string(),
            stale_window_secs: DEFAULT_STALE_WINDOW_SECS,
            bypass_header: DEFAULT_BYPASS_HEADER.to_string(),
            bypass_value: DEFAULT_BYPASS_VALUE.to_string(),
            backend_timeout_ms: DEFAULT_BACKEND_TIMEOUT_MS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            client_directed_ttl_secs: settings.client_directed_ttl_secs.get(),
            server_side_ttl_secs: settings.server_side_ttl_secs.get(),
            layered_ttl_secs: settings.layered_ttl_secs.get(),
            conditional_ttl_secs: settings.conditional_ttl_secs.get(),
            server_side_capacity: settings.server_side_capacity.get(),
            server_side_policy: settings.server_side_policy.clone(),
            l1_capacity: settings.l1_capacity.get(),
            validator_capacity: settings.validator_capacity.get(),
            l2_address: settings.l2_address.clone(),
            stale_window_secs: settings.stale_window_secs,
            bypass_header: settings.bypass_header.clone(),
            bypass_value: settings.bypass_value.clone(),
            backend_timeout_ms: settings.backend_timeout_ms.get(),
        }
    }
}

impl CacheConfig {
    /// Entry lifetime for `strategy`; `None` keeps nothing.
    pub fn ttl(&self, strategy: Strategy) -> Option<Duration> {
        let secs = match strategy {
            Strategy::None => return None,
            Strategy::ClientDirected => self.client_directed_ttl_secs,
            Strategy::ServerSide => self.server_side_ttl_secs,
            Strategy::Layered => self.layered_ttl_secs,
            Strategy::Conditional => self.conditional_ttl_secs,
        };
        Some(Duration::from_secs(secs.max(1)))
    }

    pub fn stale_window(&self) -> Duration {
        Duration::from_secs(self.stale_window_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms.max(1))
    }

    /// True when the shared tier lives in process memory.
    pub fn l2_in_memory(&self) -> bool {
        self.l2_address.trim().eq_ignore_ascii_case(DEFAULT_L2_ADDRESS)
    }

    /// Returns the server-side capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn server_side_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.server_side_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the L1 capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn l1_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.l1_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the validator capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn validator_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.validator_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.client_directed_ttl_secs, 60);
        assert_eq!(config.server_side_capacity, 1024);
        assert_eq!(config.server_side_policy, "products");
        assert_eq!(config.l1_capacity, 256);
        assert_eq!(config.bypass_header, "cache-control");
        assert_eq!(config.bypass_value, "no-cache");
        assert!(config.l2_in_memory());
    }

    #[test]
    fn none_strategy_has_no_ttl() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl(Strategy::None), None);
        assert_eq!(
            config.ttl(Strategy::Layered),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn postgres_address_is_not_in_memory() {
        let config = CacheConfig {
            l2_address: "postgres://localhost/cache".to_string(),
            ..Default::default()
        };
        assert!(!config.l2_in_memory());
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            l1_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.l1_capacity_non_zero().get(), 1);
    }
}
