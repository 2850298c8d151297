//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{CliArgs, Command, DatabaseOverride, SeedArgs, ServeArgs, ServeOverrides};

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheConfig;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "stratacache";
const ENV_PREFIX: &str = "STRATACACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_DB_CONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_SEED_COUNT: u64 = 850_000;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub connect_attempts: NonZeroU32,
    pub seed_on_start: bool,
    pub seed_count: NonZeroUsize,
}

/// Validated `[cache]` section; converted into [`CacheConfig`] for the cache layer.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub client_directed_ttl_secs: NonZeroU64,
    pub server_side_ttl_secs: NonZeroU64,
    pub layered_ttl_secs: NonZeroU64,
    pub conditional_ttl_secs: NonZeroU64,
    pub server_side_capacity: NonZeroUsize,
    pub server_side_policy: String,
    pub l1_capacity: NonZeroUsize,
    pub validator_capacity: NonZeroUsize,
    pub l2_address: String,
    pub stale_window_secs: u64,
    pub bypass_header: String,
    pub bypass_value: String,
    pub backend_timeout_ms: NonZeroU64,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Seed(args)) => raw.apply_seed_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(seed) = overrides.database_seed_on_start {
            self.database.seed_on_start = Some(seed);
        }
        if let Some(address) = overrides.cache_l2_address.as_ref() {
            self.cache.l2_address = Some(address.clone());
        }
        if let Some(capacity) = overrides.cache_server_side_capacity {
            self.cache.server_side_capacity = Some(capacity);
        }
        if let Some(capacity) = overrides.cache_l1_capacity {
            self.cache.l1_capacity = Some(capacity);
        }
        if let Some(seconds) = overrides.cache_stale_window_seconds {
            self.cache.stale_window_seconds = Some(seconds);
        }

        self.apply_database_override(&overrides.database);
    }

    fn apply_seed_overrides(&mut self, args: &SeedArgs) {
        if let Some(count) = args.count {
            self.database.seed_count = Some(count);
        }
        self.apply_database_override(&args.database);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
        })
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::from(&self.cache)
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;
    let connect_attempts = non_zero_u32(
        database
            .connect_attempts
            .unwrap_or(DEFAULT_DB_CONNECT_ATTEMPTS)
            .into(),
        "database.connect_attempts",
    )?;
    let seed_count = non_zero_usize(
        database.seed_count.unwrap_or(DEFAULT_SEED_COUNT),
        "database.seed_count",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        connect_attempts,
        seed_on_start: database.seed_on_start.unwrap_or(false),
        seed_count,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();

    let server_side_policy = cache
        .server_side_policy
        .unwrap_or(defaults.server_side_policy)
        .trim()
        .to_string();
    if server_side_policy.is_empty() {
        return Err(LoadError::invalid(
            "cache.server_side_policy",
            "must not be empty",
        ));
    }

    let l2_address = cache
        .l2_address
        .unwrap_or(defaults.l2_address)
        .trim()
        .to_string();
    if !(l2_address.eq_ignore_ascii_case("memory")
        || l2_address.starts_with("postgres://")
        || l2_address.starts_with("postgresql://"))
    {
        return Err(LoadError::invalid(
            "cache.l2_address",
            "expected `memory` or a postgres:// URL",
        ));
    }

    let bypass_header = cache
        .bypass_header
        .unwrap_or(defaults.bypass_header)
        .trim()
        .to_string();
    if axum::http::HeaderName::from_bytes(bypass_header.as_bytes()).is_err() {
        return Err(LoadError::invalid(
            "cache.bypass_header",
            format!("`{bypass_header}` is not a valid header name"),
        ));
    }

    Ok(CacheSettings {
        client_directed_ttl_secs: non_zero_u64(
            cache
                .client_directed_ttl_seconds
                .unwrap_or(defaults.client_directed_ttl_secs),
            "cache.client_directed_ttl_seconds",
        )?,
        server_side_ttl_secs: non_zero_u64(
            cache
                .server_side_ttl_seconds
                .unwrap_or(defaults.server_side_ttl_secs),
            "cache.server_side_ttl_seconds",
        )?,
        layered_ttl_secs: non_zero_u64(
            cache
                .layered_ttl_seconds
                .unwrap_or(defaults.layered_ttl_secs),
            "cache.layered_ttl_seconds",
        )?,
        conditional_ttl_secs: non_zero_u64(
            cache
                .conditional_ttl_seconds
                .unwrap_or(defaults.conditional_ttl_secs),
            "cache.conditional_ttl_seconds",
        )?,
        server_side_capacity: non_zero_usize(
            cache
                .server_side_capacity
                .unwrap_or(defaults.server_side_capacity) as u64,
            "cache.server_side_capacity",
        )?,
        server_side_policy,
        l1_capacity: non_zero_usize(
            cache.l1_capacity.unwrap_or(defaults.l1_capacity) as u64,
            "cache.l1_capacity",
        )?,
        validator_capacity: non_zero_usize(
            cache
                .validator_capacity
                .unwrap_or(defaults.validator_capacity) as u64,
            "cache.validator_capacity",
        )?,
        l2_address,
        stale_window_secs: cache
            .stale_window_seconds
            .unwrap_or(defaults.stale_window_secs),
        bypass_header,
        bypass_value: cache
            .bypass_value
            .unwrap_or(defaults.bypass_value)
            .trim()
            .to_string(),
        backend_timeout_ms: non_zero_u64(
            cache
                .backend_timeout_ms
                .unwrap_or(defaults.backend_timeout_ms),
            "cache.backend_timeout_ms",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    connect_attempts: Option<u32>,
    seed_on_start: Option<bool>,
    seed_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    client_directed_ttl_seconds: Option<u64>,
    server_side_ttl_seconds: Option<u64>,
    layered_ttl_seconds: Option<u64>,
    conditional_ttl_seconds: Option<u64>,
    server_side_capacity: Option<usize>,
    server_side_policy: Option<String>,
    l1_capacity: Option<usize>,
    validator_capacity: Option<usize>,
    l2_address: Option<String>,
    stale_window_seconds: Option<u64>,
    bypass_header: Option<String>,
    bypass_value: Option<String>,
    backend_timeout_ms: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
