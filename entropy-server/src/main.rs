use chrono::Utc;
use entropy_db::db;
use entropy_server::config::ServerConfig;
use entropy_server::feeder::KernelFeeder;
use entropy_server::jobs::{Orchestrator, Scheduler};
use entropy_server::messages::ConfigUpdate;
use entropy_server::stream::{IngestServer, SubscriberRegistry};
use log::{info, warn};
use miette::IntoDiagnostic;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Largest batch a single gateway is expected to send; echoed to
/// gateways as part of the control handshake.
const MAX_BATCH_EVENTS: u32 = 2000;

#[tokio::main]
async fn main() -> miette::Result<()> {
    env_logger::init();

    let config = ServerConfig::config().into_diagnostic()?;

    entropy_db::migrations::run_migrations().into_diagnostic()?;
    let pool = entropy_db::get_pool(config.db_pool_size).into_diagnostic()?;

    // Any job the previous process left behind can never make progress
    // again; fail it before accepting new work.
    {
        let mut conn = pool.get().into_diagnostic()?;
        let (queued, running) = db::recover_orphaned_jobs(&mut conn, Utc::now()).into_diagnostic()?;
        if queued + running > 0 {
            warn!(
                "Recovered {queued} queued and {running} running jobs from a \
                previous process as failed",
            );
        }
    }

    let shutdown = CancellationToken::new();

    let subscribers = Arc::new(SubscriberRegistry::new(config.subscriber_batches_per_second));
    let ingest = Arc::new(IngestServer::new(
        pool.clone(),
        config.ingest_queue_capacity,
        Arc::clone(&subscribers),
        ConfigUpdate {
            max_batch_events: MAX_BATCH_EVENTS,
            max_clock_skew_ahead_secs: entropy_server::mapping::MAX_FUTURE_SKEW.num_seconds(),
            max_clock_skew_behind_hours: entropy_server::mapping::MAX_PAST_SKEW.num_hours(),
        },
    ));

    let orchestrator = Arc::new(Orchestrator::new(pool.clone(), &config));

    let scheduler = Scheduler::new(
        Arc::clone(&orchestrator),
        &config.hourly_suite_cron,
        &config.weekly_assessment_cron,
    )
    .into_diagnostic()?;
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    let feeder = Arc::new(KernelFeeder::new(
        pool.clone(),
        PathBuf::from(&config.feeder_device),
        Duration::from_secs(config.feeder_period_seconds),
        config.feeder_max_bytes,
    ));
    let feeder_handle = tokio::spawn(Arc::clone(&feeder).run(shutdown.clone()));

    // The transport adapters (gRPC/REST) attach to `ingest` and
    // `orchestrator` from outside this core; from here the process
    // serves scheduled work until it is told to stop.
    info!(
        "Entropy core is up: queue capacity {}, {} max parallel jobs, \
        feeding {} every {}s",
        config.ingest_queue_capacity,
        config.max_parallel_jobs,
        config.feeder_device,
        config.feeder_period_seconds,
    );
    tokio::signal::ctrl_c().await.into_diagnostic()?;
    info!("Shutdown requested");
    shutdown.cancel();

    scheduler_handle.await.into_diagnostic()?;
    feeder_handle.await.into_diagnostic()?;
    info!(
        "Shut down cleanly; {} live subscribers dropped, feeder wrote {} bytes this run",
        ingest.subscribers().len(),
        feeder.total_bytes_written(),
    );

    Ok(())
}
