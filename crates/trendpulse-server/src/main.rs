mod api;
mod middleware;
mod scheduler;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use trendpulse_engine::{
    Engine, EngineSettings, MemoryCacheBackend, MemoryPersistence, Persistence, SystemClock,
};
use trendpulse_ingest::{
    BackoffPolicy, CheckpointStore, HttpEventSource, IngestionClient, MemoryCheckpointStore,
    RateLimiter,
};

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
    scheduler::IngestJob,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(trendpulse_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let catalog = trendpulse_core::load_catalog(&config.catalog_path)?;

    let (persistence, checkpoints): (Arc<dyn Persistence>, Arc<dyn CheckpointStore>) =
        if config.database_url.is_some() {
            let pool = trendpulse_db::connect_pool_from_config(&config).await?;
            let applied = trendpulse_db::run_migrations(&pool).await?;
            tracing::info!(applied, "database migrations complete");
            let store = Arc::new(trendpulse_db::PgStore::new(pool));
            (store.clone(), store)
        } else {
            tracing::warn!("DATABASE_URL not set; state is kept in memory only");
            (
                Arc::new(MemoryPersistence::new()),
                Arc::new(MemoryCheckpointStore::new()),
            )
        };

    let engine = Arc::new(Engine::new(
        EngineSettings::from_app_config(&config),
        Arc::new(SystemClock),
        persistence,
        Arc::new(MemoryCacheBackend::new(config.cache_max_entries)),
    ));
    let report = engine.bootstrap(&catalog.entities).await?;
    tracing::info!(
        entities = report.entities,
        seeded = report.seeded,
        windows = report.windows,
        snapshots = report.snapshots,
        "engine bootstrapped"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut upstream_limiter = None;
    let ingest_job = match config.upstream_base_url.as_deref() {
        Some(base_url) => {
            let limiter = Arc::new(RateLimiter::new(
                config.upstream_rate_limit_requests,
                Duration::from_secs(config.upstream_rate_limit_window_secs),
                Duration::from_millis(config.upstream_rate_limit_timeout_ms),
            ));
            let source = HttpEventSource::with_base_url(
                base_url,
                config.upstream_api_key.as_deref(),
                config.upstream_page_size,
                config.upstream_request_timeout_secs,
            )?;
            let policy = BackoffPolicy {
                max_attempts: config.upstream_max_attempts,
                base: Duration::from_millis(config.upstream_backoff_base_ms),
                cap: Duration::from_millis(config.upstream_backoff_cap_ms),
            };
            upstream_limiter = Some(Arc::clone(&limiter));
            Some(Arc::new(IngestJob::new(
                IngestionClient::new(source, limiter, policy),
                checkpoints,
                Arc::clone(&engine),
                shutdown_rx,
            )))
        }
        None => {
            tracing::warn!("UPSTREAM_BASE_URL not set; scheduled ingestion disabled");
            None
        }
    };

    let mut scheduler =
        scheduler::build_scheduler(Arc::clone(&engine), ingest_job, &config).await?;

    let auth = AuthState::from_env(matches!(
        config.env,
        trendpulse_core::Environment::Development
    ))?;
    let app = build_app(
        AppState {
            engine,
            upstream_limiter,
        },
        auth,
        default_rate_limit_state(),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
