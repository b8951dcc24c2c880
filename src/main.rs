use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use game_lifecycle::api::latency::JobStats;
use game_lifecycle::api::routes::{router, ApiState};
use game_lifecycle::clock::{Clock, SystemClock};
use game_lifecycle::config::{Config, CHANNEL_CAPACITY};
use game_lifecycle::db::{self, JobRunWriter};
use game_lifecycle::error::Result;
use game_lifecycle::fetcher::FeedClient;
use game_lifecycle::lifecycle::JobLockManager;
use game_lifecycle::scheduler::{JobRunner, Scheduler};
use game_lifecycle::sync::GameSync;
use game_lifecycle::types::JobRunEvent;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // --- Feed + ingestion ---
    let feed = Arc::new(FeedClient::new(&cfg, Arc::clone(&clock))?);
    let sync = Arc::new(GameSync::new(
        pool.clone(),
        feed,
        cfg.leagues.clone(),
        Arc::clone(&clock),
    ));

    // --- Job run log writer ---
    let (run_tx, run_rx) = mpsc::channel::<JobRunEvent>(CHANNEL_CAPACITY);
    let writer = JobRunWriter::new(pool.clone(), run_rx);
    tokio::spawn(async move { writer.run().await });

    // --- Lease-guarded job runner ---
    let locks = JobLockManager::new(pool.clone(), cfg.worker_id.clone(), Arc::clone(&clock));
    let stats = Arc::new(JobStats::new());
    let runner = Arc::new(JobRunner::new(
        pool.clone(),
        locks,
        Arc::clone(&stats),
        run_tx,
        Arc::clone(&clock),
        cfg.lock_ttl_ms(),
    ));
    info!(worker = %cfg.worker_id, ttl_secs = cfg.lock_ttl_secs, "job runner ready");

    if cfg.scheduler_enabled {
        if cfg.leagues.is_empty() {
            warn!("LEAGUES is empty: sync and discover will not fetch anything");
        }
        let scheduler = Scheduler::new(pool.clone(), Arc::clone(&runner), Arc::clone(&sync));
        tokio::spawn(async move { scheduler.run().await });
        info!(leagues = ?cfg.leagues, "scheduler started");
    } else {
        info!("scheduler disabled, jobs run only through the trigger routes");
    }

    if cfg.cron_secret.is_none() {
        warn!("CRON_SECRET not set: trigger and admin routes will reject every request");
    }

    // HTTP API server
    let api_state = ApiState {
        pool,
        runner,
        sync,
        stats,
        clock,
        cron_secret: cfg.cron_secret.clone(),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
