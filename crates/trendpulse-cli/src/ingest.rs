//! One-shot ingestion: drain the upstream feed, seal closed windows, print
//! the resulting rankings.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio::sync::watch;
use trendpulse_core::{AppConfig, EntityKind};
use trendpulse_engine::{
    Engine, EngineSettings, MemoryCacheBackend, MemoryPersistence, Persistence, RankedEntity,
    SortOrder, SystemClock,
};
use trendpulse_ingest::{
    run_ingestion, BackoffPolicy, CheckpointStore, HttpEventSource, IngestionClient,
    MemoryCheckpointStore, RateLimiter,
};

/// Runs a single ingestion pass against the configured upstream.
///
/// Without `DATABASE_URL` the pass runs against in-memory state, which is
/// useful for smoke-testing an upstream but keeps nothing.
///
/// # Errors
///
/// Returns an error if the upstream is not configured, the catalog or
/// database cannot be loaded, or the ingestion run fails.
pub(crate) async fn run_ingest(config: &AppConfig, top: usize) -> anyhow::Result<()> {
    let Some(base_url) = config.upstream_base_url.as_deref() else {
        anyhow::bail!("UPSTREAM_BASE_URL must be set to run ingestion");
    };

    let catalog = trendpulse_core::load_catalog(&config.catalog_path)?;
    let (persistence, checkpoints) = open_stores(config).await?;

    let engine = Engine::new(
        EngineSettings::from_app_config(config),
        Arc::new(SystemClock),
        persistence,
        Arc::new(MemoryCacheBackend::new(config.cache_max_entries)),
    );
    engine.bootstrap(&catalog.entities).await?;

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
    let client = IngestionClient::new(
        source,
        limiter,
        BackoffPolicy {
            max_attempts: config.upstream_max_attempts,
            base: Duration::from_millis(config.upstream_backoff_base_ms),
            cap: Duration::from_millis(config.upstream_backoff_cap_ms),
        },
    );

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let report = run_ingestion(&client, checkpoints.as_ref(), &engine, shutdown_rx).await?;
    println!(
        "ingested {} page(s): {} event(s) delivered, {} counted, {} rejected, {} malformed page(s)",
        report.pages,
        report.events_delivered,
        report.events_accepted,
        report.events_rejected,
        report.malformed_pages
    );

    let tick = engine.tick().await;
    println!(
        "sealed {} window(s), rescored {} entit(ies)",
        tick.sealed, tick.rescored
    );

    let pages = try_join_all(EntityKind::ALL.map(|kind| {
        let engine = &engine;
        async move {
            engine
                .query()
                .get_ranked_entities(kind, SortOrder::Momentum, top, 0)
                .await
                .map(|page| (kind, page.items))
        }
    }))
    .await?;

    for (kind, items) in pages {
        println!();
        println!("top {kind}s");
        if items.is_empty() {
            println!("  (none)");
        }
        for (index, item) in items.iter().enumerate() {
            println!("{}", format_ranked(index + 1, item));
        }
    }

    Ok(())
}

async fn open_stores(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn Persistence>, Arc<dyn CheckpointStore>)> {
    if config.database_url.is_none() {
        tracing::warn!("DATABASE_URL not set; ingesting into memory only");
        return Ok((
            Arc::new(MemoryPersistence::new()),
            Arc::new(MemoryCheckpointStore::new()),
        ));
    }

    let pool = trendpulse_db::connect_pool_from_config(config).await?;
    trendpulse_db::run_migrations(&pool).await?;
    let store = Arc::new(trendpulse_db::PgStore::new(pool));
    Ok((store.clone(), store))
}

pub(crate) fn format_ranked(rank: usize, item: &RankedEntity) -> String {
    format!(
        "{rank:>3}. {:<32} score {:.3}  mentions {:>7}  growth {:+.2}",
        item.display_name,
        item.snapshot.momentum_score,
        item.snapshot.mention_count_total,
        item.snapshot.growth_rate
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trendpulse_core::{EntityId, ScoreSnapshot};

    #[test]
    fn format_ranked_aligns_columns() {
        let item = RankedEntity {
            snapshot: ScoreSnapshot {
                entity_id: EntityId(1),
                momentum_score: 0.951_2,
                mention_count_total: 600,
                computed_at: Utc::now(),
                growth_rate: 4.0,
            },
            display_name: "Wide Leg Denim".to_string(),
            kind: EntityKind::Trend,
            description: None,
        };

        let line = format_ranked(1, &item);
        assert!(line.starts_with("  1. Wide Leg Denim"));
        assert!(line.contains("score 0.951"));
        assert!(line.contains("mentions     600"));
        assert!(line.contains("growth +4.00"));
    }
}
