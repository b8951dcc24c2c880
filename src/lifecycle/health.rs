use serde::Serialize;
use tracing::error;

use crate::config::staleness::*;

/// Max ids reported per check for triage.
const SAMPLE_LIMIT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Threshold {
    pub warning: i64,
    pub critical: i64,
}

impl Threshold {
    pub fn severity(&self, count: i64) -> Severity {
        if count >= self.critical {
            Severity::Critical
        } else if count >= self.warning {
            Severity::Warning
        } else {
            Severity::Ok
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    StuckLiveGames,
    StuckScheduledGames,
    OrphanedFinalGames,
    StuckQueueEntries,
    FailedMaxAttempts,
    StaleProcessingLocks,
}

impl CheckKind {
    pub const ALL: [CheckKind; 6] = [
        CheckKind::StuckLiveGames,
        CheckKind::StuckScheduledGames,
        CheckKind::OrphanedFinalGames,
        CheckKind::StuckQueueEntries,
        CheckKind::FailedMaxAttempts,
        CheckKind::StaleProcessingLocks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CheckKind::StuckLiveGames => "stuck_live_games",
            CheckKind::StuckScheduledGames => "stuck_scheduled_games",
            CheckKind::OrphanedFinalGames => "orphaned_final_games",
            CheckKind::StuckQueueEntries => "stuck_queue_entries",
            CheckKind::FailedMaxAttempts => "failed_max_attempts",
            CheckKind::StaleProcessingLocks => "stale_processing_locks",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// One stuck live game is already worth a look; stuck scheduled games are
    /// mostly off-season noise until there are many of them.
    pub fn threshold(self) -> Threshold {
        let (warning, critical) = match self {
            CheckKind::StuckLiveGames => (1, 5),
            CheckKind::StuckScheduledGames => (20, 50),
            CheckKind::OrphanedFinalGames => (1, 10),
            CheckKind::StuckQueueEntries => (5, 20),
            CheckKind::FailedMaxAttempts => (1, 5),
            CheckKind::StaleProcessingLocks => (1, 3),
        };
        Threshold { warning, critical }
    }

    fn table(self) -> &'static str {
        match self {
            CheckKind::StuckLiveGames
            | CheckKind::StuckScheduledGames
            | CheckKind::OrphanedFinalGames => "sports_games",
            CheckKind::StuckQueueEntries
            | CheckKind::FailedMaxAttempts
            | CheckKind::StaleProcessingLocks => "settlement_queue",
        }
    }

    fn predicate(self) -> &'static str {
        match self {
            CheckKind::StuckLiveGames => {
                "status_norm = 'LIVE' AND starts_at < ?1 AND finalized_at IS NULL"
            }
            CheckKind::StuckScheduledGames => {
                "status_norm = 'SCHEDULED' AND starts_at < ?1 AND finalized_at IS NULL"
            }
            CheckKind::OrphanedFinalGames => ORPHANED_FINAL_PREDICATE,
            CheckKind::StuckQueueEntries => {
                "status IN ('QUEUED', 'PROCESSING') AND updated_at < ?1"
            }
            CheckKind::FailedMaxAttempts => "status = 'FAILED' AND attempts >= ?1",
            CheckKind::StaleProcessingLocks => "status = 'PROCESSING' AND locked_at < ?1",
        }
    }

    fn param(self, now_ms: i64) -> Option<i64> {
        match self {
            CheckKind::StuckLiveGames => Some(now_ms - STUCK_LIVE_MS),
            CheckKind::StuckScheduledGames => Some(now_ms - STUCK_SCHEDULED_MS),
            CheckKind::OrphanedFinalGames => None,
            CheckKind::StuckQueueEntries => Some(now_ms - STUCK_QUEUE_MS),
            CheckKind::FailedMaxAttempts => Some(MAX_SETTLEMENT_ATTEMPTS),
            CheckKind::StaleProcessingLocks => Some(now_ms - STALE_PROCESSING_LOCK_MS),
        }
    }
}

/// FINAL, unsettled, and no settlement row of any status.
pub(crate) const ORPHANED_FINAL_PREDICATE: &str = "status_norm = 'FINAL' AND settled_at IS NULL \
     AND NOT EXISTS (SELECT 1 FROM settlement_queue q WHERE q.game_id = sports_games.id)";

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub count: i64,
    pub severity: Severity,
    pub threshold: Threshold,
    pub sample_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: i64,
    pub checks: Vec<CheckResult>,
}

/// Worst severity wins. `Healthy` only when every check is `Ok`.
pub fn aggregate(checks: &[CheckResult]) -> HealthStatus {
    match checks.iter().map(|c| c.severity).max() {
        Some(Severity::Critical) => HealthStatus::Critical,
        Some(Severity::Warning) => HealthStatus::Degraded,
        Some(Severity::Ok) | None => HealthStatus::Healthy,
    }
}

/// Run one check. Query failures degrade the check to `warning` with a zero
/// count instead of surfacing an error.
pub async fn run_check(pool: &sqlx::SqlitePool, kind: CheckKind, now_ms: i64) -> CheckResult {
    let threshold = kind.threshold();
    match query_check(pool, kind, now_ms).await {
        Ok((count, sample_ids)) => CheckResult {
            name: kind.name(),
            count,
            severity: threshold.severity(count),
            threshold,
            sample_ids,
            error: None,
        },
        Err(e) => {
            error!(check = kind.name(), "health check query failed: {e}");
            CheckResult {
                name: kind.name(),
                count: 0,
                severity: Severity::Warning,
                threshold,
                sample_ids: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

pub async fn run_all(pool: &sqlx::SqlitePool, now_ms: i64) -> HealthReport {
    let mut checks = Vec::with_capacity(CheckKind::ALL.len());
    for kind in CheckKind::ALL {
        checks.push(run_check(pool, kind, now_ms).await);
    }
    HealthReport { status: aggregate(&checks), checked_at: now_ms, checks }
}

async fn query_check(
    pool: &sqlx::SqlitePool,
    kind: CheckKind,
    now_ms: i64,
) -> Result<(i64, Vec<i64>), sqlx::Error> {
    let count_sql = format!("SELECT COUNT(*) FROM {} WHERE {}", kind.table(), kind.predicate());
    let sample_sql = format!(
        "SELECT id FROM {} WHERE {} ORDER BY id LIMIT {SAMPLE_LIMIT}",
        kind.table(),
        kind.predicate()
    );
    let param = kind.param(now_ms);

    let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
    let mut sample_q = sqlx::query_scalar::<_, i64>(&sample_sql);
    if let Some(p) = param {
        count_q = count_q.bind(p);
        sample_q = sample_q.bind(p);
    }

    let count = count_q.fetch_one(pool).await?;
    let sample_ids = if count > 0 { sample_q.fetch_all(pool).await? } else { Vec::new() };
    Ok((count, sample_ids))
}
