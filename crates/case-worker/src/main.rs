//! KycFlow Case Worker
//!
//! Claims cases from the store and drives them through the pipeline:
//! 1. Claims the oldest unclaimed claimable case
//! 2. Extracts and maps the source document
//! 3. Reconciles against the stored profile and screens the entity
//! 4. Auto-closes clean cases or escalates to outreach

mod errors;
mod extraction;
mod mapper;
mod pipeline;
mod reconcile;
mod screening;

use crate::extraction::create_extractor;
use crate::pipeline::CasePipeline;
use kycflow_common::{
    config::AppConfig,
    db::{DbPool, Repository},
    metrics::register_metrics,
    outreach::StoreOutreachGateway,
    VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting KycFlow Case Worker v{}", VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let config = Arc::new(config);

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let repository = Repository::new(db);

    // Initialize the extraction backend
    let extractor = create_extractor(&config.extraction)?;
    info!(provider = extractor.provider_name(), "Extractor initialized");

    // Metrics exporter
    if config.observability.metrics_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        register_metrics();
        info!(addr = %addr, "Metrics exporter listening");
    }

    let outreach = Arc::new(StoreOutreachGateway::new(repository.clone()));
    let pipeline = Arc::new(CasePipeline::new(
        repository,
        extractor,
        outreach,
        config.clone(),
    ));

    // Spawn the worker pool
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Periodic pending-cases gauge
    {
        let repository = pipeline.repository().clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {
                        match repository.count_pending_cases().await {
                            Ok(count) => kycflow_common::metrics::set_pending_cases(count),
                            Err(e) => warn!(error = %e, "Failed to count pending cases"),
                        }
                    }
                }
            }
        });
    }
    let poll_interval = Duration::from_millis(config.worker.poll_interval_ms);
    let worker_count = config.worker.count.max(1);

    info!(workers = worker_count, "Case worker ready, starting claim polling...");

    let mut handles = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let pipeline = pipeline.clone();
        let mut shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            run_worker(worker_id, pipeline, poll_interval, &mut shutdown).await;
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task panicked");
        }
    }

    info!("Case worker shutting down");
    Ok(())
}

/// One worker: claim, process, repeat. Sleeps between empty polls and
/// backs off through a circuit breaker after repeated failures.
async fn run_worker(
    worker_id: usize,
    pipeline: Arc<CasePipeline>,
    poll_interval: Duration,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) {
    const MAX_FAILURES: u32 = 5;
    const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);

    let mut consecutive_failures = 0u32;

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Circuit breaker check
        if consecutive_failures >= MAX_FAILURES {
            warn!(worker_id, failures = consecutive_failures, "Circuit breaker open, pausing...");
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(CIRCUIT_BREAK_DURATION) => {}
            }
            consecutive_failures = 0;
            info!(worker_id, "Circuit breaker reset, resuming...");
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            claimed = pipeline.claim_next() => {
                match claimed {
                    Ok(Some(case)) => {
                        let case_id = case.id;
                        info!(worker_id, case_id = %case_id, state = %case.state, "Claimed case");

                        match pipeline.process_case(case).await {
                            Ok(case) => {
                                consecutive_failures = 0;
                                info!(
                                    worker_id,
                                    case_id = %case_id,
                                    state = %case.state,
                                    "Case parked"
                                );
                            }
                            Err(e) => {
                                consecutive_failures += 1;
                                error!(
                                    worker_id,
                                    case_id = %case_id,
                                    error = %e,
                                    failures = consecutive_failures,
                                    "Failed to process case"
                                );
                            }
                        }
                    }
                    Ok(None) => {
                        consecutive_failures = 0;
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(worker_id, error = %e, "Failed to claim a case");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    info!(worker_id, "Worker stopped");
}
