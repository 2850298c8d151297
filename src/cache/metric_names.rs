//! Metric names emitted by the cache layer.

pub const METRIC_LOOKUP_TOTAL: &str = "stratacache_lookup_total";
pub const METRIC_BACKEND_CALL_TOTAL: &str = "stratacache_backend_call_total";
pub const METRIC_BACKEND_MS: &str = "stratacache_backend_ms";
pub const METRIC_CAPACITY_EVICT_TOTAL: &str = "stratacache_capacity_evict_total";
pub const METRIC_TAG_EVICT_TOTAL: &str = "stratacache_tag_evict_total";
pub const METRIC_EVICTION_FAILURE_TOTAL: &str = "stratacache_eviction_failure_total";
pub const METRIC_STALE_SERVED_TOTAL: &str = "stratacache_stale_served_total";
pub const METRIC_FLIGHT_JOINED_TOTAL: &str = "stratacache_flight_joined_total";
