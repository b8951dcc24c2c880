//! Settlement queue contract shared with the settlement worker.
//!
//! Rows move `QUEUED -> PROCESSING -> DONE | FAILED`. Every transition is a
//! single conditional UPDATE on the current status, so two workers can never
//! both move the same row out of a given state.

use tracing::{info, warn};

use crate::config::staleness::MAX_SETTLEMENT_ATTEMPTS;
use crate::db::models::QueueRow;
use crate::error::Result;
use crate::types::WinnerSide;

/// Minimal game fields needed to create a queue row.
#[derive(Debug, Clone)]
pub struct QueueTarget {
    pub game_id: i64,
    pub league: String,
    pub external_game_id: String,
    pub provider: String,
}

/// Insert a QUEUED row for the game unless it already has a row of any status.
/// Returns whether a row was created.
pub async fn enqueue<'e, E>(
    executor: E,
    target: &QueueTarget,
    outcome: WinnerSide,
    now_ms: i64,
) -> Result<bool>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let res = sqlx::query(
        r#"
        INSERT INTO settlement_queue (
            game_id, league, external_game_id, provider, status, outcome,
            attempts, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, 'QUEUED', ?5, 0, ?6, ?6)
        ON CONFLICT(game_id) DO NOTHING
        "#,
    )
    .bind(target.game_id)
    .bind(&target.league)
    .bind(&target.external_game_id)
    .bind(&target.provider)
    .bind(outcome.as_str())
    .bind(now_ms)
    .execute(executor)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Move the oldest QUEUED row to PROCESSING for `worker_id`.
pub async fn claim_next(
    pool: &sqlx::SqlitePool,
    worker_id: &str,
    now_ms: i64,
) -> Result<Option<QueueRow>> {
    let row = sqlx::query_as::<_, QueueRow>(
        r#"
        UPDATE settlement_queue
        SET status = 'PROCESSING', locked_by = ?1, locked_at = ?2, updated_at = ?2
        WHERE id = (
            SELECT id FROM settlement_queue
            WHERE status = 'QUEUED'
            ORDER BY created_at, id
            LIMIT 1
        ) AND status = 'QUEUED'
        RETURNING *
        "#,
    )
    .bind(worker_id)
    .bind(now_ms)
    .fetch_optional(pool)
    .await?;

    if let Some(r) = &row {
        info!(queue_id = r.id, game_id = r.game_id, worker = %worker_id, "settlement claimed");
    }
    Ok(row)
}

/// PROCESSING -> DONE, and stamp the game's `settled_at` if it is still unset.
pub async fn mark_done(pool: &sqlx::SqlitePool, id: i64, now_ms: i64) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let game_id: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE settlement_queue
        SET status = 'DONE', locked_by = NULL, locked_at = NULL, last_error = NULL, updated_at = ?1
        WHERE id = ?2 AND status = 'PROCESSING'
        RETURNING game_id
        "#,
    )
    .bind(now_ms)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(game_id) = game_id else {
        tx.rollback().await?;
        return Ok(false);
    };

    sqlx::query(
        r#"
        UPDATE sports_games
        SET settled_at = COALESCE(settled_at, ?1), updated_at = ?1
        WHERE id = ?2
        "#,
    )
    .bind(now_ms)
    .bind(game_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// PROCESSING -> FAILED with `attempts += 1`.
pub async fn mark_failed(pool: &sqlx::SqlitePool, id: i64, error: &str, now_ms: i64) -> Result<bool> {
    let attempts: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE settlement_queue
        SET status = 'FAILED', attempts = attempts + 1, last_error = ?1,
            locked_by = NULL, locked_at = NULL, updated_at = ?2
        WHERE id = ?3 AND status = 'PROCESSING'
        RETURNING attempts
        "#,
    )
    .bind(error)
    .bind(now_ms)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match attempts {
        Some(n) if n >= MAX_SETTLEMENT_ATTEMPTS => {
            warn!(queue_id = id, attempts = n, "settlement failed permanently, needs manual intervention");
            Ok(true)
        }
        Some(_) => Ok(true),
        None => Ok(false),
    }
}

/// FAILED rows below the attempt ceiling go back to QUEUED.
pub async fn requeue_retryable(pool: &sqlx::SqlitePool, now_ms: i64) -> Result<u64> {
    let res = sqlx::query(
        r#"
        UPDATE settlement_queue
        SET status = 'QUEUED', updated_at = ?1
        WHERE status = 'FAILED' AND attempts < ?2
        "#,
    )
    .bind(now_ms)
    .bind(MAX_SETTLEMENT_ATTEMPTS)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

pub async fn get(pool: &sqlx::SqlitePool, id: i64) -> Result<Option<QueueRow>> {
    let row = sqlx::query_as::<_, QueueRow>("SELECT * FROM settlement_queue WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn for_game(pool: &sqlx::SqlitePool, game_id: i64) -> Result<Vec<QueueRow>> {
    let rows = sqlx::query_as::<_, QueueRow>("SELECT * FROM settlement_queue WHERE game_id = ?")
        .bind(game_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_memory, seed_game};
    use crate::types::{QueueStatus, StatusNorm};

    fn target(game_id: i64) -> QueueTarget {
        QueueTarget {
            game_id,
            league: "nfl".to_string(),
            external_game_id: format!("ext-{game_id}"),
            provider: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_per_game() {
        let pool = connect_memory().await;
        let game = seed_game(&pool, "a", StatusNorm::Final, 0, (Some(1), Some(0))).await;

        assert!(enqueue(&pool, &target(game), WinnerSide::Home, 10).await.unwrap());
        assert!(!enqueue(&pool, &target(game), WinnerSide::Away, 20).await.unwrap());

        let rows = for_game(&pool, game).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome.as_deref(), Some("HOME"));
    }

    #[tokio::test]
    async fn claim_done_sets_settled_at() {
        let pool = connect_memory().await;
        let game = seed_game(&pool, "a", StatusNorm::Final, 0, (Some(1), Some(0))).await;
        enqueue(&pool, &target(game), WinnerSide::Home, 10).await.unwrap();

        let claimed = claim_next(&pool, "settler-1", 20).await.unwrap().unwrap();
        assert_eq!(claimed.queue_status(), Some(QueueStatus::Processing));
        assert_eq!(claimed.locked_by.as_deref(), Some("settler-1"));
        assert!(claim_next(&pool, "settler-2", 21).await.unwrap().is_none());

        assert!(mark_done(&pool, claimed.id, 30).await.unwrap());
        assert!(!mark_done(&pool, claimed.id, 31).await.unwrap(), "DONE rows cannot be completed twice");

        let settled: Option<i64> = sqlx::query_scalar("SELECT settled_at FROM sports_games WHERE id = ?")
            .bind(game)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(settled, Some(30));
    }

    #[tokio::test]
    async fn failures_count_attempts_and_stop_requeueing_at_ceiling() {
        let pool = connect_memory().await;
        let game = seed_game(&pool, "a", StatusNorm::Final, 0, (Some(1), Some(1))).await;
        enqueue(&pool, &target(game), WinnerSide::Draw, 0).await.unwrap();

        for round in 0..MAX_SETTLEMENT_ATTEMPTS {
            let row = claim_next(&pool, "w", round).await.unwrap().expect("claimable");
            assert!(mark_failed(&pool, row.id, "payout rpc down", round).await.unwrap());
            requeue_retryable(&pool, round).await.unwrap();
        }

        let row = &for_game(&pool, game).await.unwrap()[0];
        assert_eq!(row.attempts, MAX_SETTLEMENT_ATTEMPTS);
        assert_eq!(row.queue_status(), Some(QueueStatus::Failed));
        assert_eq!(row.last_error.as_deref(), Some("payout rpc down"));
        assert!(claim_next(&pool, "w", 100).await.unwrap().is_none());
    }
}
