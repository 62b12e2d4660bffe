//! Background job scheduler.
//!
//! Initialises a [`JobScheduler`] at server startup and registers the
//! ingestion, window tick and decay sweep jobs.

mod ingest;

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use trendpulse_core::AppConfig;
use trendpulse_engine::Engine;
use trendpulse_ingest::EventSource;

pub use ingest::IngestJob;

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process. Dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a cron expression is invalid, or the scheduler fails to start.
pub async fn build_scheduler<S: EventSource + 'static>(
    engine: Arc<Engine>,
    ingest: Option<Arc<IngestJob<S>>>,
    config: &AppConfig,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    if let Some(job) = ingest {
        register_ingest_job(&scheduler, job, &config.ingest_cron).await?;
    }
    register_tick_job(&scheduler, Arc::clone(&engine), &config.tick_cron).await?;
    register_sweep_job(&scheduler, engine, &config.sweep_cron).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_ingest_job<S: EventSource + 'static>(
    scheduler: &JobScheduler,
    ingest: Arc<IngestJob<S>>,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let ingest = Arc::clone(&ingest);
        Box::pin(async move {
            ingest.run_once().await;
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = %cron, "scheduler: registered ingest job");
    Ok(())
}

/// Seals closed windows and rescores the entities that own them.
async fn register_tick_job(
    scheduler: &JobScheduler,
    engine: Arc<Engine>,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let engine = Arc::clone(&engine);
        Box::pin(async move {
            let report = engine.tick().await;
            tracing::debug!(
                sealed = report.sealed,
                rescored = report.rescored,
                "scheduler: window tick complete"
            );
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = %cron, "scheduler: registered tick job");
    Ok(())
}

/// Rescores every live entity so quiet ones decay toward zero.
async fn register_sweep_job(
    scheduler: &JobScheduler,
    engine: Arc<Engine>,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let engine = Arc::clone(&engine);
        Box::pin(async move {
            let rescored = engine.sweep().await;
            tracing::info!(rescored, "scheduler: decay sweep complete");
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = %cron, "scheduler: registered sweep job");
    Ok(())
}
