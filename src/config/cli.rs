use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

pub(super) const DEFAULT_IN_MEMORY_PRODUCTS: usize = 10_000;

/// Command-line arguments for the stratacache binary.
#[derive(Debug, Parser)]
#[command(
    name = "stratacache",
    version,
    about = "Product queries behind interchangeable caching strategies"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STRATACACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Populate an empty products table with generated rows.
    Seed(SeedArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,

    /// Serve a generated in-process catalogue instead of Postgres.
    #[arg(long = "in-memory", action = clap::ArgAction::SetTrue)]
    pub in_memory: bool,

    /// Number of generated products in `--in-memory` mode.
    #[arg(
        long = "in-memory-products",
        value_name = "COUNT",
        default_value_t = DEFAULT_IN_MEMORY_PRODUCTS
    )]
    pub in_memory_products: usize,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            overrides: ServeOverrides::default(),
            in_memory: false,
            in_memory_products: DEFAULT_IN_MEMORY_PRODUCTS,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Seed an empty products table before serving.
    #[arg(
        long = "database-seed-on-start",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub database_seed_on_start: Option<bool>,

    /// Override the shared cache tier address (`memory` or a Postgres URL).
    #[arg(long = "cache-l2-address", value_name = "ADDRESS")]
    pub cache_l2_address: Option<String>,

    /// Override the server-side output cache capacity.
    #[arg(long = "cache-server-side-capacity", value_name = "COUNT")]
    pub cache_server_side_capacity: Option<usize>,

    /// Override the layered in-process tier capacity.
    #[arg(long = "cache-l1-capacity", value_name = "COUNT")]
    pub cache_l1_capacity: Option<usize>,

    /// Override how long stale layered entries may be served on backend failure.
    #[arg(long = "cache-stale-window-seconds", value_name = "SECONDS")]
    pub cache_stale_window_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SeedArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Number of products to generate.
    #[arg(long = "count", value_name = "COUNT")]
    pub count: Option<u64>,
}
