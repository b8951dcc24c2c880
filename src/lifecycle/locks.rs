use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::db::models::JobLockRow;
use crate::error::Result;
use crate::types::JobName;

/// Result of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockOutcome {
    /// This worker holds the lease until `expires_at`.
    Acquired { expires_at: i64 },
    /// Someone else holds a live lease; skip this run.
    Rejected { holder: String, expires_at: i64 },
    /// The lock table could not be used. Work proceeds without exclusion.
    Degraded { reason: String },
}

impl LockOutcome {
    /// Whether the caller should run the job body.
    pub fn should_run(&self) -> bool {
        !matches!(self, LockOutcome::Rejected { .. })
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired { .. })
    }
}

/// Output of [`JobLockManager::with_lock`]. `result` is `None` when the run was skipped.
#[derive(Debug)]
pub struct Guarded<T> {
    pub lock: LockOutcome,
    pub result: Option<Result<T>>,
}

/// Renewal handle for a job body that may outlive its initial TTL.
#[derive(Clone)]
pub struct Lease {
    locks: JobLockManager,
    job: JobName,
    extend_by_ms: i64,
}

impl Lease {
    pub fn job(&self) -> JobName {
        self.job
    }

    /// Push the lease forward. Returns false when this worker no longer holds
    /// it or the lock table cannot be reached; the caller keeps running either way.
    pub async fn renew(&self) -> bool {
        match self.locks.extend(self.job, self.extend_by_ms).await {
            Ok(true) => {
                debug!(job = %self.job, extend_by_ms = self.extend_by_ms, "lease renewed");
                true
            }
            Ok(false) => {
                warn!(job = %self.job, worker = %self.locks.worker_id, "lease not held, renewal skipped");
                false
            }
            Err(e) => {
                warn!(job = %self.job, "lease renewal failed: {e}");
                false
            }
        }
    }
}

/// Lease-based mutual exclusion over the `job_locks` table.
#[derive(Clone)]
pub struct JobLockManager {
    pool: sqlx::SqlitePool,
    worker_id: String,
    clock: Arc<dyn Clock>,
}

/// Upserts only when no row exists or the existing lease has expired, so
/// the expiry check and the write are one statement.
const ACQUIRE_SQL: &str = r#"
    INSERT INTO job_locks (job_name, locked_by, locked_at, expires_at, meta)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(job_name) DO UPDATE SET
        locked_by = excluded.locked_by,
        locked_at = excluded.locked_at,
        expires_at = excluded.expires_at,
        meta = excluded.meta
    WHERE job_locks.expires_at <= excluded.locked_at
    RETURNING locked_by, expires_at
"#;

/// Attempts before reporting a rejection whose holder vanished in between.
const ACQUIRE_ATTEMPTS: usize = 2;

impl JobLockManager {
    pub fn new(pool: sqlx::SqlitePool, worker_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, worker_id: worker_id.into(), clock }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Try to take the lease for `job` for `ttl_ms`. Never returns an error:
    /// a broken lock table yields [`LockOutcome::Degraded`].
    pub async fn acquire(&self, job: JobName, ttl_ms: i64) -> LockOutcome {
        match self.try_acquire(job, ttl_ms).await {
            Ok(outcome) => {
                match &outcome {
                    LockOutcome::Acquired { expires_at } => {
                        debug!(job = %job, worker = %self.worker_id, expires_at, "lock acquired")
                    }
                    LockOutcome::Rejected { holder, expires_at } => {
                        info!(job = %job, holder = %holder, expires_at, "lock held elsewhere, skipping run")
                    }
                    LockOutcome::Degraded { .. } => {}
                }
                outcome
            }
            Err(e) => {
                warn!(job = %job, "lock table unavailable, failing open: {e}");
                LockOutcome::Degraded { reason: e.to_string() }
            }
        }
    }

    async fn try_acquire(&self, job: JobName, ttl_ms: i64) -> Result<LockOutcome> {
        let now = self.clock.now_ms();
        let expires_at = now.saturating_add(ttl_ms.max(1));
        let meta = serde_json::json!({ "pid": std::process::id() }).to_string();

        for _ in 0..ACQUIRE_ATTEMPTS {
            let written: Option<(String, i64)> = sqlx::query_as(ACQUIRE_SQL)
                .bind(job.as_str())
                .bind(&self.worker_id)
                .bind(now)
                .bind(expires_at)
                .bind(&meta)
                .fetch_optional(&self.pool)
                .await?;

            if let Some((holder, recorded_expiry)) = written {
                if holder == self.worker_id {
                    return Ok(LockOutcome::Acquired { expires_at: recorded_expiry });
                }
            }

            // Conflict with a live lease: report who holds it.
            if let Some(current) = self.get(job).await? {
                return Ok(LockOutcome::Rejected {
                    holder: current.locked_by,
                    expires_at: current.expires_at,
                });
            }
            // the holder released between our write and read; try once more
        }

        Ok(LockOutcome::Rejected { holder: "unknown".to_string(), expires_at: now })
    }

    /// Delete the lock row for `job`, whoever holds it.
    pub async fn release(&self, job: JobName) -> Result<bool> {
        let res = sqlx::query("DELETE FROM job_locks WHERE job_name = ?")
            .bind(job.as_str())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Delete the lock row only if this worker is still the recorded holder.
    pub async fn release_own(&self, job: JobName) -> Result<bool> {
        let res = sqlx::query("DELETE FROM job_locks WHERE job_name = ? AND locked_by = ?")
            .bind(job.as_str())
            .bind(&self.worker_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Push the lease forward by `extra_ms`. Returns false when this worker no
    /// longer holds it.
    pub async fn extend(&self, job: JobName, extra_ms: i64) -> Result<bool> {
        let now = self.clock.now_ms();
        let res = sqlx::query(
            r#"
            UPDATE job_locks
            SET expires_at = MAX(expires_at, ?1) + ?2
            WHERE job_name = ?3 AND locked_by = ?4
            "#,
        )
        .bind(now)
        .bind(extra_ms.max(0))
        .bind(job.as_str())
        .bind(&self.worker_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn get(&self, job: JobName) -> Result<Option<JobLockRow>> {
        let row = sqlx::query_as::<_, JobLockRow>("SELECT * FROM job_locks WHERE job_name = ?")
            .bind(job.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list(&self) -> Result<Vec<JobLockRow>> {
        let rows = sqlx::query_as::<_, JobLockRow>("SELECT * FROM job_locks ORDER BY job_name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub fn lease(&self, job: JobName, extend_by_ms: i64) -> Lease {
        Lease { locks: self.clone(), job, extend_by_ms }
    }

    /// Run `body` under the lease for `job`. The lease is released after the
    /// body returns, on both the success and the error path. A rejected
    /// acquisition skips the body entirely.
    pub async fn with_lock<T, F, Fut>(&self, job: JobName, ttl_ms: i64, body: F) -> Guarded<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lock = self.acquire(job, ttl_ms).await;
        if !lock.should_run() {
            return Guarded { lock, result: None };
        }

        let result = body().await;

        if lock.is_acquired() {
            match self.release_own(job).await {
                Ok(true) => {}
                Ok(false) => warn!(job = %job, "lease was lost before release"),
                Err(e) => warn!(job = %job, "lock release failed: {e}"),
            }
        }

        Guarded { lock, result: Some(result) }
    }
}
