use std::{future::IntoFuture, process, sync::Arc};

use edgecache::{
    application::{
        error::AppError,
        pipeline::{ContentPipeline, OriginFetcher, PipelineConfig},
        proxy::{ProxyService, RetryPolicy},
        registration::RegistrationService,
        repos::OriginsRepo,
    },
    cache::{
        CacheBackend, CacheConfig, CacheReaper, DiskStore, MemoryBackend, StampedeGuard,
        TieredStore,
    },
    config::{self, CacheBackendKind},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        origin_client::ReqwestFetcher,
        origins::InMemoryOrigins,
        redis::RedisBackend,
        telemetry,
    },
};
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
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Reap(_) => run_reap(settings).await,
        config::Command::Register(args) => run_register(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings);
    let backend = init_cache_backend(&settings).await?;
    let disk = init_disk_store(&cache_config)?;
    let origins = init_origins(&settings).await?;

    let registration = Arc::new(RegistrationService::new(
        origins.clone(),
        settings.registration.api_key.clone(),
    ));
    if settings.registration.api_key.is_none() {
        warn!(
            target = "edgecache::serve",
            "No registration api key configured; POST /register rejects every request"
        );
    }
    seed_static_origins(&registration, &settings).await?;

    let fetcher: Arc<dyn OriginFetcher> = Arc::new(
        ReqwestFetcher::from_settings(&settings.origin).map_err(AppError::from)?,
    );
    let pipeline = ContentPipeline::new(fetcher, PipelineConfig::from(&settings));
    let store = Arc::new(TieredStore::new(
        backend.clone(),
        disk.clone(),
        cache_config.spillover_threshold_bytes,
    ));
    let guard = StampedeGuard::new(backend.clone(), cache_config.lease_ttl);
    let proxy = Arc::new(ProxyService::new(
        origins,
        store,
        guard,
        pipeline,
        cache_config.default_ttl,
        RetryPolicy::from(&cache_config),
    ));

    let reaper_handle =
        CacheReaper::new(backend.clone(), disk, cache_config.reaper_interval).spawn();

    let state = HttpState {
        proxy,
        registration,
        backend,
    };
    let result = serve_http(&settings, state).await;

    reaper_handle.abort();
    let _ = reaper_handle.await;

    result
}

async fn run_reap(settings: config::Settings) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings);
    let backend = init_cache_backend(&settings).await?;
    let disk = init_disk_store(&cache_config)?;

    let report = CacheReaper::new(backend, disk, cache_config.reaper_interval)
        .sweep()
        .await
        .map_err(|err| AppError::from(InfraError::cache_backend(err.to_string())))?;

    info!(
        target = "edgecache::reap",
        expired = report.expired,
        files_deleted = report.files_deleted,
        failures = report.failures,
        "Reaper sweep completed"
    );
    Ok(())
}

async fn run_register(
    settings: config::Settings,
    args: config::RegisterArgs,
) -> Result<(), AppError> {
    if settings.database.url.is_none() {
        return Err(AppError::validation(
            "register requires a database url; the in-memory registry does not outlive the process",
        ));
    }

    let origins = init_origins(&settings).await?;
    let outcome = RegistrationService::new(origins, None)
        .register_trusted(&args.site, &args.origin)
        .await
        .map_err(|err| AppError::validation(err.to_string()))?;

    info!(
        target = "edgecache::register",
        site = %outcome.origin.site_identifier,
        origin_url = %outcome.origin.origin_url,
        created = outcome.created,
        "Registration completed"
    );
    Ok(())
}

async fn init_cache_backend(
    settings: &config::Settings,
) -> Result<Arc<dyn CacheBackend>, AppError> {
    let backend: Arc<dyn CacheBackend> = match settings.cache.backend {
        CacheBackendKind::Redis => Arc::new(RedisBackend::connect(&settings.cache.redis).await?),
        CacheBackendKind::Memory => {
            info!(
                target = "edgecache::serve",
                capacity = settings.cache.memory_capacity.get(),
                "Using in-process cache backend"
            );
            Arc::new(MemoryBackend::new(settings.cache.memory_capacity))
        }
    };
    Ok(backend)
}

fn init_disk_store(cache_config: &CacheConfig) -> Result<DiskStore, AppError> {
    DiskStore::new(cache_config.directory.clone())
        .map_err(|err| AppError::from(InfraError::from(err)))
}

async fn init_origins(settings: &config::Settings) -> Result<Arc<dyn OriginsRepo>, AppError> {
    let Some(database_url) = settings.database.url.as_ref() else {
        info!(
            target = "edgecache::serve",
            "No database url configured; using in-memory origin registry"
        );
        return Ok(Arc::new(InMemoryOrigins::new()));
    };

    let pool =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let repositories = PostgresRepositories::new(pool);
    repositories
        .health_check()
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(repositories))
}

async fn seed_static_origins(
    registration: &RegistrationService,
    settings: &config::Settings,
) -> Result<(), AppError> {
    for origin in &settings.origins {
        registration
            .register_trusted(origin.site_identifier.as_str(), origin.origin_url.as_str())
            .await
            .map_err(|err| AppError::validation(err.to_string()))?;
    }
    Ok(())
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "edgecache::serve",
        addr = %settings.server.addr,
        "Listening"
    );

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stop_tx.send(());
        })
        .into_future();
    let mut server = std::pin::pin!(server);

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::unexpected(format!("server error: {err}")));
        }
        _ = stop_rx => {}
    }

    match tokio::time::timeout(settings.server.graceful_shutdown, server).await {
        Ok(result) => result.map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        Err(_) => {
            warn!(
                target = "edgecache::serve",
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!(target = "edgecache::serve", "Shutdown signal received");
}
