use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::api::latency::JobStats;
use crate::clock::Clock;
use crate::config::{FAST_JOB_INTERVAL_SECS, SLOW_JOB_INTERVAL_SECS};
use crate::error::Result;
use crate::lifecycle::health::{self, HealthStatus};
use crate::lifecycle::{run_finalize, FinalizeReport, JobLockManager, Lease, LockOutcome};
use crate::sync::GameSync;
use crate::types::{JobName, JobRunEvent, RunOutcome};

/// Outcome of a locked job run, as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport<T> {
    pub job: JobName,
    pub lock: LockOutcome,
    pub outcome: RunOutcome,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared by the scheduler loops and the admin routes: every job goes through
/// the lease, the duration histogram and the run log.
pub struct JobRunner {
    pool: sqlx::SqlitePool,
    locks: JobLockManager,
    stats: Arc<JobStats>,
    run_tx: mpsc::Sender<JobRunEvent>,
    clock: Arc<dyn Clock>,
    lock_ttl_ms: i64,
}

impl JobRunner {
    pub fn new(
        pool: sqlx::SqlitePool,
        locks: JobLockManager,
        stats: Arc<JobStats>,
        run_tx: mpsc::Sender<JobRunEvent>,
        clock: Arc<dyn Clock>,
        lock_ttl_ms: i64,
    ) -> Self {
        Self { pool, locks, stats, run_tx, clock, lock_ttl_ms }
    }

    pub fn locks(&self) -> &JobLockManager {
        &self.locks
    }

    /// Renewal handle for a body run through [`run_locked`](Self::run_locked),
    /// extending by the runner's lock TTL.
    pub fn lease(&self, job: JobName) -> Lease {
        self.locks.lease(job, self.lock_ttl_ms)
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Run `body` under the lease for `job`.
    pub async fn run_locked<T, F, Fut>(&self, job: JobName, body: F) -> JobReport<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started_at_ms = self.clock.now_ms();
        let started = Instant::now();
        let guarded = self.locks.with_lock(job, self.lock_ttl_ms, body).await;
        let elapsed = started.elapsed();

        let (outcome, result, error) = match guarded.result {
            None => (RunOutcome::Skipped, None, None),
            Some(Ok(value)) => {
                let outcome = if guarded.lock.is_acquired() {
                    RunOutcome::Ok
                } else {
                    RunOutcome::Degraded
                };
                (outcome, Some(value), None)
            }
            Some(Err(e)) => {
                error!(job = %job, "job failed: {e}");
                (RunOutcome::Error, None, Some(e.to_string()))
            }
        };

        let report = JobReport {
            job,
            lock: guarded.lock,
            outcome,
            duration_ms: elapsed.as_millis() as u64,
            result,
            error,
        };
        self.finish(job, started_at_ms, elapsed, outcome, &report);
        report
    }

    /// The finalize pass owns its lease handling; only timing and logging happen here.
    pub async fn finalize(&self) -> FinalizeReport {
        let started_at_ms = self.clock.now_ms();
        let started = Instant::now();
        let report = run_finalize(&self.pool, &self.locks, self.lock_ttl_ms, started_at_ms).await;
        self.finish(JobName::Finalize, started_at_ms, started.elapsed(), report.run_outcome(), &report);
        report
    }

    fn finish<S: Serialize>(
        &self,
        job: JobName,
        started_at_ms: i64,
        elapsed: Duration,
        outcome: RunOutcome,
        report: &S,
    ) {
        if outcome != RunOutcome::Skipped {
            self.stats.record(job, elapsed);
        }
        let summary = serde_json::to_value(report).unwrap_or(serde_json::Value::Null);
        let event = JobRunEvent {
            job,
            worker_id: self.locks.worker_id().to_string(),
            started_at_ms,
            finished_at_ms: self.clock.now_ms(),
            outcome,
            summary,
        };
        if let Err(e) = self.run_tx.try_send(event) {
            warn!(job = %job, "job run log channel full: {e}");
        }
    }
}

/// Background loops on the fixed cadence: sync + finalize every 2 minutes,
/// discover + health sweep every 10 minutes.
pub struct Scheduler {
    pool: sqlx::SqlitePool,
    runner: Arc<JobRunner>,
    sync: Arc<GameSync>,
}

impl Scheduler {
    pub fn new(pool: sqlx::SqlitePool, runner: Arc<JobRunner>, sync: Arc<GameSync>) -> Self {
        Self { pool, runner, sync }
    }

    pub async fn run(self) {
        let fast = {
            let runner = Arc::clone(&self.runner);
            let sync = Arc::clone(&self.sync);
            tokio::spawn(async move { fast_loop(runner, sync).await })
        };
        let slow = tokio::spawn(async move { slow_loop(self.pool, self.runner, self.sync).await });

        if let Err(e) = tokio::try_join!(fast, slow) {
            error!("scheduler loop exited: {e}");
        }
    }
}

async fn fast_loop(runner: Arc<JobRunner>, sync: Arc<GameSync>) {
    let mut interval = tokio::time::interval(Duration::from_secs(FAST_JOB_INTERVAL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await; // first tick is immediate: run once at startup
        runner.run_locked(JobName::Sync, || sync.sync_today()).await;
        runner.finalize().await;
    }
}

async fn slow_loop(pool: sqlx::SqlitePool, runner: Arc<JobRunner>, sync: Arc<GameSync>) {
    let mut interval = tokio::time::interval(Duration::from_secs(SLOW_JOB_INTERVAL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        runner.run_locked(JobName::Discover, || sync.discover()).await;
        health_sweep(&pool, runner.now_ms()).await;
    }
}

/// Log the aggregate health status and every check that is not ok.
async fn health_sweep(pool: &sqlx::SqlitePool, now_ms: i64) {
    let report = health::run_all(pool, now_ms).await;
    for check in report.checks.iter().filter(|c| c.severity != health::Severity::Ok) {
        warn!(
            check = check.name,
            count = check.count,
            severity = ?check.severity,
            sample_ids = ?check.sample_ids,
            "lifecycle check above threshold"
        );
    }
    match report.status {
        HealthStatus::Healthy => info!("lifecycle health: healthy"),
        HealthStatus::Degraded => warn!("lifecycle health: degraded"),
        HealthStatus::Critical => error!("lifecycle health: critical"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{connect_memory, seed_game};
    use crate::error::AppError;
    use crate::types::StatusNorm;

    async fn make_runner(
        pool: &sqlx::SqlitePool,
        worker: &str,
    ) -> (JobRunner, mpsc::Receiver<JobRunEvent>, Arc<JobStats>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let (tx, rx) = mpsc::channel(16);
        let stats = Arc::new(JobStats::new());
        let locks = JobLockManager::new(pool.clone(), worker, clock.clone());
        (JobRunner::new(pool.clone(), locks, stats.clone(), tx, clock, 60_000), rx, stats)
    }

    #[tokio::test]
    async fn run_locked_logs_and_records() {
        let pool = connect_memory().await;
        let (runner, mut rx, stats) = make_runner(&pool, "w1").await;

        let report = runner.run_locked(JobName::Sync, || async { Ok(7u32) }).await;
        assert_eq!(report.outcome, RunOutcome::Ok);
        assert_eq!(report.result, Some(7));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.job, JobName::Sync);
        assert_eq!(event.worker_id, "w1");
        assert_eq!(event.summary["result"], 7);
        let sync_stats = stats.summary().into_iter().find(|s| s.job == JobName::Sync).unwrap();
        assert_eq!(sync_stats.runs, 1);
    }

    #[tokio::test]
    async fn run_locked_reports_errors_and_skips() {
        let pool = connect_memory().await;
        let (runner, mut rx, _) = make_runner(&pool, "w1").await;

        let failed: JobReport<()> = runner
            .run_locked(JobName::Backfill, || async {
                Err(AppError::InvalidInput("bad range".to_string()))
            })
            .await;
        assert_eq!(failed.outcome, RunOutcome::Error);
        assert!(failed.error.unwrap().contains("bad range"));
        assert_eq!(rx.try_recv().unwrap().outcome, RunOutcome::Error);

        runner.locks().acquire(JobName::Discover, 60_000).await;
        let (other, _rx2, _) = make_runner(&pool, "w2").await;
        let skipped = other.run_locked(JobName::Discover, || async { Ok(()) }).await;
        assert_eq!(skipped.outcome, RunOutcome::Skipped);
    }

    #[tokio::test]
    async fn unavailable_lock_table_still_runs_and_logs_degraded() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let (runner, mut rx, _) = make_runner(&pool, "w1").await;

        let report = runner.run_locked(JobName::Sync, || async { Ok(1u32) }).await;
        assert!(matches!(report.lock, LockOutcome::Degraded { .. }));
        assert_eq!(report.outcome, RunOutcome::Degraded);
        assert_eq!(report.result, Some(1));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.outcome, RunOutcome::Degraded);
        assert_eq!(event.summary["lock"]["state"], "degraded");
    }

    #[tokio::test]
    async fn finalize_goes_through_run_log() {
        let pool = connect_memory().await;
        let (runner, mut rx, _) = make_runner(&pool, "w1").await;
        seed_game(&pool, "g", StatusNorm::Final, 0, (Some(0), Some(1))).await;

        let report = runner.finalize().await;
        assert_eq!(report.orphans.enqueued, 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.job, JobName::Finalize);
        assert_eq!(event.summary["orphans"]["enqueued"], 1);
    }
}
