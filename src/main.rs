use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use playlog::config::AppConfig;
use playlog::services::{
    scheduler, CatalogService, CoverArtClient, EnrichmentWorker, JobQueueService, MetadataCache,
    MetadataResolver, MusicBrainzClient, PlayIngestor, Reconciler, SessionEngine, SpotifyClient,
};
use playlog::{create_router, database, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            // A missing MusicBrainz User-Agent or production secret is
            // not survivable; refuse to start.
            tracing::error!(error = %err, "configuration error");
            std::process::exit(1);
        }
    };

    let db_pool = database::create_pool(&config.database).await?;
    database::run_migrations(&db_pool).await?;
    tracing::info!("database ready");

    // Shared clients. The MusicBrainz client is globally serialized, so
    // one instance must be shared by every loop.
    let mb = Arc::new(MusicBrainzClient::new(&config.musicbrainz)?);
    let coverart = Arc::new(CoverArtClient::new(&config.musicbrainz)?);
    let cache = Arc::new(MetadataCache::new());
    let resolver = Arc::new(MetadataResolver::new(mb.clone(), coverart.clone(), cache));
    let spotify = Arc::new(SpotifyClient::new(config.spotify.clone(), db_pool.clone())?);

    let queue = Arc::new(JobQueueService::new(db_pool.clone(), config.queue));
    let catalog = Arc::new(CatalogService::new(db_pool.clone(), queue.clone()));
    let ingestor = Arc::new(PlayIngestor::new(resolver.clone(), catalog.clone()));

    let engine = Arc::new(SessionEngine::new(
        db_pool.clone(),
        spotify.clone(),
        ingestor.clone(),
        catalog.clone(),
        config.engine,
    ));
    let reconciler = Arc::new(Reconciler::new(
        spotify.clone(),
        ingestor.clone(),
        catalog.clone(),
        config.reconciler,
        config.engine,
    ));
    let worker = Arc::new(EnrichmentWorker::new(
        db_pool.clone(),
        queue.clone(),
        catalog.clone(),
        resolver.clone(),
        mb.clone(),
        coverart.clone(),
        config.worker.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(scheduler::run_fast_loop(
        engine,
        Duration::from_millis(config.engine.poll_interval_ms),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(scheduler::run_slow_loop(
        reconciler,
        Duration::from_millis(config.reconciler.interval_ms),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(scheduler::run_worker_loop(
        worker,
        Duration::from_millis(config.worker.idle_poll_interval_ms),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(scheduler::run_reaper_loop(
        queue.clone(),
        Duration::from_secs(config.queue.reap_interval_secs),
        shutdown_rx.clone(),
    )));

    let state = AppState {
        db_pool,
        auth: Arc::new(config.auth.clone()),
        catalog,
        queue,
    };
    let router = create_router(state);

    let bind_address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "playlog listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain the background loops before exiting.
    tracing::info!("shutting down background loops");
    shutdown_tx.send(true).ok();
    futures::future::join_all(tasks).await;
    tracing::info!("shutdown complete");

    Ok(())
}

/// Resolve when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
