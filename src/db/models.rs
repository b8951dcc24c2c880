/// Row types for the lifecycle tables (see migrations/0001_lifecycle.sql).
/// Status columns stay as strings here; callers map them through `types`.
use serde::Serialize;

use crate::types::{QueueStatus, StatusNorm};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GameRow {
    pub id: i64,
    pub league: String,
    pub external_game_id: String,
    pub provider: String,
    pub status_norm: String,
    pub status_raw: Option<String>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub starts_at: i64,
    pub finalized_at: Option<i64>,
    pub settled_at: Option<i64>,
    pub winner_side: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl GameRow {
    pub fn status(&self) -> Option<StatusNorm> {
        StatusNorm::parse(&self.status_norm)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueueRow {
    pub id: i64,
    pub game_id: i64,
    pub league: String,
    pub external_game_id: String,
    pub provider: String,
    pub status: String,
    pub outcome: Option<String>,
    pub attempts: i64,
    pub locked_by: Option<String>,
    pub locked_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl QueueRow {
    pub fn queue_status(&self) -> Option<QueueStatus> {
        QueueStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobLockRow {
    pub job_name: String,
    pub locked_by: String,
    pub locked_at: i64,
    pub expires_at: i64,
    pub meta: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobRunRow {
    pub id: i64,
    pub job_name: String,
    pub worker_id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub outcome: String,
    pub summary: Option<String>,
}
