use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter,
    filter::Directive,
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_BACKEND_CALL_TOTAL, METRIC_BACKEND_MS, METRIC_CAPACITY_EVICT_TOTAL,
    METRIC_EVICTION_FAILURE_TOTAL, METRIC_FLIGHT_JOINED_TOTAL, METRIC_LOOKUP_TOTAL,
    METRIC_STALE_SERVED_TOTAL, METRIC_TAG_EVICT_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Per-statement logging that would bury cache events, unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["sqlx::query=warn", "sqlx::postgres::notice=warn"];

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = env_filter(logging.level);

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
        for directive in QUIET_TARGETS.iter().filter_map(|raw| raw.parse::<Directive>().ok()) {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_LOOKUP_TOTAL,
            Unit::Count,
            "Cache lookups by strategy and outcome."
        );
        describe_counter!(
            METRIC_BACKEND_CALL_TOTAL,
            Unit::Count,
            "Product queries sent to the backend, by strategy."
        );
        describe_histogram!(
            METRIC_BACKEND_MS,
            Unit::Milliseconds,
            "Backend product query latency in milliseconds."
        );
        describe_counter!(
            METRIC_CAPACITY_EVICT_TOTAL,
            Unit::Count,
            "Entries dropped because a bounded store was full."
        );
        describe_counter!(
            METRIC_TAG_EVICT_TOTAL,
            Unit::Count,
            "Entries removed by tag invalidation."
        );
        describe_counter!(
            METRIC_EVICTION_FAILURE_TOTAL,
            Unit::Count,
            "Stores that failed to evict during an invalidation pass."
        );
        describe_counter!(
            METRIC_STALE_SERVED_TOTAL,
            Unit::Count,
            "Soft-expired entries served because the backend was unavailable."
        );
        describe_counter!(
            METRIC_FLIGHT_JOINED_TOTAL,
            Unit::Count,
            "Requests that joined an in-flight population instead of querying the backend."
        );
    });
}
