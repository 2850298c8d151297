//! Cache orchestration layer.
//!
//! Serves the category product query through interchangeable strategies:
//!
//! - **None**: every request reaches the backend
//! - **ClientDirected**: `Cache-Control`/`Vary` headers, no server state
//! - **ServerSide**: LRU-bounded output cache with tag eviction
//! - **Layered**: in-process L1 in front of a shared L2, single-flight population
//!   and stale-if-error serving
//! - **Conditional**: entity tags answered with `304 Not Modified`
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `stratacache.toml`:
//!
//! ```toml
//! [cache]
//! server_side_ttl_seconds = 60
//! server_side_capacity = 1024
//! l1_capacity = 256
//! l2_address = "memory"
//! # ... see config.rs for all options
//! ```

mod conditional;
mod config;
mod error;
mod eviction;
mod flight;
mod keys;
mod layered;
pub(crate) mod lock;
mod metric_names;
mod orchestrator;
mod passthrough;
mod registry;
mod server_side;
mod store;
mod tier;
mod validator;

pub use conditional::ConditionalStore;
pub use config::{CacheConfig, MAX_RESULTS};
pub use error::{CacheError, EvictionFailure, EvictionPartialFailure};
pub use eviction::{EvictionCoordinator, EvictionReport};
pub use flight::FlightGroup;
pub use keys::{CATEGORY_REQUIRED, CacheKey, Strategy, Tag, build_key};
pub use layered::LayeredStore;
pub use metric_names::*;
pub use orchestrator::{CacheOrchestrator, QueryOutcome, Source, derive_tags};
pub use passthrough::{ClientDirectedStore, NoneStore};
pub use registry::TagIndex;
pub use server_side::ServerSideStore;
pub use store::{
    CacheEntry, CacheRequest, EntryDraft, Epoch, Freshness, Lookup, ResponseDirectives,
    StrategyStore,
};
pub use tier::{MemoryTier, SharedTier};
pub use validator::{EntityTag, IfNoneMatch};
