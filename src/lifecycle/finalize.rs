use std::time::Instant;

use serde::Serialize;
use tracing::{error, info};

use crate::error::Result;
use crate::lifecycle::locks::{JobLockManager, LockOutcome};
use crate::lifecycle::repair::{self, OrphanRepair, ReleasedLocks};
use crate::lifecycle::status::stamp_unfinalized_finals;
use crate::types::{JobName, RunOutcome};

/// Result of one finalize pass. Always serializable, including skipped and
/// failed runs, so the trigger endpoint never answers with a bare error.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizeReport {
    pub ok: bool,
    pub worker: String,
    pub lock: LockOutcome,
    pub skipped: bool,
    pub released_locks: ReleasedLocks,
    pub finalized: u64,
    pub orphans: OrphanRepair,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FinalizeReport {
    pub fn run_outcome(&self) -> RunOutcome {
        if self.error.is_some() {
            RunOutcome::Error
        } else if self.skipped {
            RunOutcome::Skipped
        } else if matches!(self.lock, LockOutcome::Degraded { .. }) {
            RunOutcome::Degraded
        } else {
            RunOutcome::Ok
        }
    }
}

#[derive(Default)]
struct FinalizeCounts {
    released_locks: ReleasedLocks,
    finalized: u64,
    orphans: OrphanRepair,
}

/// Reclaim crashed settlement workers, stamp missing finalization times, then
/// queue orphaned finals. Runs under the `finalize` lease.
pub async fn run_finalize(
    pool: &sqlx::SqlitePool,
    locks: &JobLockManager,
    ttl_ms: i64,
    now_ms: i64,
) -> FinalizeReport {
    let started = Instant::now();
    let guarded = locks
        .with_lock(JobName::Finalize, ttl_ms, || finalize_pass(pool, now_ms))
        .await;

    let mut report = FinalizeReport {
        ok: true,
        worker: locks.worker_id().to_string(),
        lock: guarded.lock,
        skipped: false,
        released_locks: ReleasedLocks::default(),
        finalized: 0,
        orphans: OrphanRepair::default(),
        duration_ms: 0,
        error: None,
    };

    match guarded.result {
        None => report.skipped = true,
        Some(Ok(counts)) => {
            report.released_locks = counts.released_locks;
            report.finalized = counts.finalized;
            report.orphans = counts.orphans;
        }
        Some(Err(e)) => {
            error!("finalize pass failed: {e}");
            report.ok = false;
            report.error = Some(e.to_string());
        }
    }
    report.duration_ms = started.elapsed().as_millis() as u64;

    if !report.skipped {
        info!(
            released = report.released_locks.released,
            finalized = report.finalized,
            enqueued = report.orphans.enqueued,
            ok = report.ok,
            duration_ms = report.duration_ms,
            "finalize pass complete"
        );
    }
    report
}

async fn finalize_pass(pool: &sqlx::SqlitePool, now_ms: i64) -> Result<FinalizeCounts> {
    let released_locks = repair::release_stale_processing_locks(pool, now_ms).await?;
    let finalized = stamp_unfinalized_finals(pool, now_ms).await?;
    let orphans = repair::enqueue_orphaned_final_games(pool, now_ms).await?;
    Ok(FinalizeCounts { released_locks, finalized, orphans })
}
