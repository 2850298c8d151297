use std::{future::IntoFuture, process, sync::Arc};

use stratacache::{
    application::{
        catalog::CatalogService,
        error::AppError,
        repos::{ProductsRepo, ProductsWriteRepo},
    },
    cache::{CacheConfig, CacheOrchestrator, MemoryTier, SharedTier},
    config,
    infra::{
        db::{PostgresRepositories, PostgresTier, SeedOutcome},
        error::{InfraError, redact_credentials},
        http::{self, BypassDirective, HttpState},
        memory::InMemoryProducts,
        telemetry,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(args) => run_serve(settings, *args).await,
        config::Command::Seed(_) => run_seed(settings).await,
    }
}

async fn run_serve(settings: config::Settings, args: config::ServeArgs) -> Result<(), AppError> {
    let cache_config = settings.cache_config();
    let l2 = init_shared_tier(&settings, &cache_config).await?;

    let backend: Arc<dyn ProductsRepo>;
    let writer: Arc<dyn ProductsWriteRepo>;
    let db: Option<PostgresRepositories>;
    if args.in_memory {
        info!(
            products = args.in_memory_products,
            "Serving generated in-memory catalogue"
        );
        let catalogue = Arc::new(InMemoryProducts::generated(args.in_memory_products));
        backend = catalogue.clone();
        writer = catalogue;
        db = None;
    } else {
        let repositories = init_repositories(&settings).await?;
        if settings.database.seed_on_start {
            seed(&repositories, settings.database.seed_count.get()).await?;
        }
        backend = repositories.clone();
        writer = repositories.clone();
        db = Some(repositories.as_ref().clone());
    }

    let bypass = BypassDirective::new(&cache_config.bypass_header, &cache_config.bypass_value);
    let orchestrator = Arc::new(CacheOrchestrator::with_default_stores(
        backend,
        cache_config,
        l2,
    ));
    let state = HttpState {
        catalog: CatalogService::new(orchestrator, writer),
        bypass,
        db,
    };

    serve_http(&settings, state).await
}

async fn run_seed(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    seed(&repositories, settings.database.seed_count.get()).await
}

async fn seed(repositories: &PostgresRepositories, count: usize) -> Result<(), AppError> {
    match repositories
        .seed_products(count)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?
    {
        SeedOutcome::Skipped { existing } => info!(existing, "Seed skipped"),
        SeedOutcome::Inserted { rows } => info!(rows, "Seed inserted products"),
    }
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect_with_retry(
        database_url,
        settings.database.max_connections.get(),
        settings.database.connect_attempts.get(),
    )
    .await
    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

/// The shared tier must be reachable at startup; later failures only degrade caching.
async fn init_shared_tier(
    settings: &config::Settings,
    cache_config: &CacheConfig,
) -> Result<Arc<dyn SharedTier>, AppError> {
    if cache_config.l2_in_memory() {
        return Ok(Arc::new(MemoryTier::new()));
    }

    let address = cache_config.l2_address.as_str();
    let pool = PostgresRepositories::connect(address, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::shared_tier(address, err)))?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::shared_tier(address, err)))?;

    let tier = PostgresTier::new(pool);
    match tier.purge_expired().await {
        Ok(purged) => info!(
            address = %redact_credentials(address),
            purged,
            "Shared cache tier ready"
        ),
        Err(err) => warn!(error = %err, "Could not purge expired shared tier entries"),
    }
    Ok(Arc::new(tier))
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "Listening");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "Could not listen for shutdown signal");
                return;
            }
            info!("Shutdown signal received; draining connections");
            shutdown.cancel();
        }
    });

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    let grace = settings.server.graceful_shutdown;

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
        }
    }

    Ok(())
}
