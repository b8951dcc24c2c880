use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Game status
// ---------------------------------------------------------------------------

/// Provider-agnostic game status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusNorm {
    Scheduled,
    Live,
    Final,
    Cancelled,
}

impl StatusNorm {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusNorm::Scheduled => "SCHEDULED",
            StatusNorm::Live => "LIVE",
            StatusNorm::Final => "FINAL",
            StatusNorm::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(StatusNorm::Scheduled),
            "LIVE" => Some(StatusNorm::Live),
            "FINAL" => Some(StatusNorm::Final),
            "CANCELLED" => Some(StatusNorm::Cancelled),
            _ => None,
        }
    }

    /// Position in the forward lifecycle. FINAL and CANCELLED are both terminal.
    pub fn rank(self) -> u8 {
        match self {
            StatusNorm::Scheduled => 0,
            StatusNorm::Live => 1,
            StatusNorm::Final | StatusNorm::Cancelled => 2,
        }
    }
}

impl std::fmt::Display for StatusNorm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Settlement queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Queued,
    Processing,
    Failed,
    Done,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Queued => "QUEUED",
            QueueStatus::Processing => "PROCESSING",
            QueueStatus::Failed => "FAILED",
            QueueStatus::Done => "DONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(QueueStatus::Queued),
            "PROCESSING" => Some(QueueStatus::Processing),
            "FAILED" => Some(QueueStatus::Failed),
            "DONE" => Some(QueueStatus::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Winning side of a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WinnerSide {
    Home,
    Away,
    Draw,
}

impl WinnerSide {
    /// `None` when either score is missing.
    pub fn from_scores(home: Option<i64>, away: Option<i64>) -> Option<Self> {
        let (home, away) = (home?, away?);
        Some(match home.cmp(&away) {
            std::cmp::Ordering::Greater => WinnerSide::Home,
            std::cmp::Ordering::Less => WinnerSide::Away,
            std::cmp::Ordering::Equal => WinnerSide::Draw,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WinnerSide::Home => "HOME",
            WinnerSide::Away => "AWAY",
            WinnerSide::Draw => "DRAW",
        }
    }
}

impl std::fmt::Display for WinnerSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Named recurring jobs serialized through `job_locks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobName {
    Discover,
    Sync,
    Finalize,
    Settle,
    Backfill,
}

impl JobName {
    pub const ALL: [JobName; 5] = [
        JobName::Discover,
        JobName::Sync,
        JobName::Finalize,
        JobName::Settle,
        JobName::Backfill,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobName::Discover => "discover",
            JobName::Sync => "sync",
            JobName::Finalize => "finalize",
            JobName::Settle => "settle",
            JobName::Backfill => "backfill",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|j| j.as_str() == s)
    }
}

impl std::fmt::Display for JobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome label written to `job_runs.outcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Ok,
    Skipped,
    Degraded,
    Error,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Ok => "ok",
            RunOutcome::Skipped => "skipped",
            RunOutcome::Degraded => "degraded",
            RunOutcome::Error => "error",
        }
    }
}

/// Completed job invocation, persisted by the run log writer.
#[derive(Debug, Clone)]
pub struct JobRunEvent {
    pub job: JobName,
    pub worker_id: String,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
    pub outcome: RunOutcome,
    pub summary: serde_json::Value,
}
