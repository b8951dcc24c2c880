use serde::Serialize;
use tracing::{info, warn};

use crate::config::staleness::STALE_PROCESSING_LOCK_MS;
use crate::error::Result;
use crate::lifecycle::health::ORPHANED_FINAL_PREDICATE;
use crate::lifecycle::queue::{self, QueueTarget};
use crate::types::WinnerSide;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReleasedLocks {
    pub released: u64,
    pub queue_ids: Vec<i64>,
}

/// Reset PROCESSING rows whose lock is older than the stale threshold back to
/// QUEUED with the lock cleared. Rows locked more recently are not touched.
pub async fn release_stale_processing_locks(
    pool: &sqlx::SqlitePool,
    now_ms: i64,
) -> Result<ReleasedLocks> {
    let cutoff = now_ms - STALE_PROCESSING_LOCK_MS;
    let queue_ids: Vec<i64> = sqlx::query_scalar(
        r#"
        UPDATE settlement_queue
        SET status = 'QUEUED', locked_by = NULL, locked_at = NULL, updated_at = ?1
        WHERE status = 'PROCESSING' AND locked_at < ?2
        RETURNING id
        "#,
    )
    .bind(now_ms)
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    if !queue_ids.is_empty() {
        warn!(count = queue_ids.len(), ids = ?queue_ids, "reclaimed stale settlement locks");
    }
    Ok(ReleasedLocks { released: queue_ids.len() as u64, queue_ids })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrphanRepair {
    pub enqueued: u64,
    /// Raced with another writer that queued the game first.
    pub already_queued: u64,
    /// Orphans with a missing score; no winner, no queue row.
    pub skipped_missing_scores: u64,
    pub game_ids: Vec<i64>,
}

#[derive(sqlx::FromRow)]
struct OrphanCandidate {
    id: i64,
    league: String,
    external_game_id: String,
    provider: String,
    home_score: Option<i64>,
    away_score: Option<i64>,
}

/// Queue every orphaned final game whose winner can be computed.
///
/// Only true gaps are filled: a game with any queue row, including a FAILED
/// one, is never selected, and the insert itself is conflict-guarded on
/// `game_id`.
pub async fn enqueue_orphaned_final_games(
    pool: &sqlx::SqlitePool,
    now_ms: i64,
) -> Result<OrphanRepair> {
    let sql = format!(
        "SELECT id, league, external_game_id, provider, home_score, away_score \
         FROM sports_games WHERE {ORPHANED_FINAL_PREDICATE} ORDER BY id"
    );
    let candidates: Vec<OrphanCandidate> = sqlx::query_as(&sql).fetch_all(pool).await?;

    let mut report = OrphanRepair::default();
    for game in candidates {
        let Some(winner) = WinnerSide::from_scores(game.home_score, game.away_score) else {
            warn!(
                game_id = game.id,
                league = %game.league,
                external_game_id = %game.external_game_id,
                "final game has no score, cannot queue settlement"
            );
            report.skipped_missing_scores += 1;
            continue;
        };

        let target = QueueTarget {
            game_id: game.id,
            league: game.league,
            external_game_id: game.external_game_id,
            provider: game.provider,
        };
        // queue row and winner_side land together or not at all
        let mut tx = pool.begin().await?;
        if queue::enqueue(&mut *tx, &target, winner, now_ms).await? {
            sqlx::query(
                "UPDATE sports_games SET winner_side = COALESCE(winner_side, ?1) WHERE id = ?2",
            )
            .bind(winner.as_str())
            .bind(game.id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            report.enqueued += 1;
            report.game_ids.push(game.id);
        } else {
            tx.rollback().await?;
            report.already_queued += 1;
        }
    }

    if report.enqueued > 0 || report.skipped_missing_scores > 0 {
        info!(
            enqueued = report.enqueued,
            skipped = report.skipped_missing_scores,
            "orphaned final games repaired"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_memory, seed_game};
    use crate::types::{QueueStatus, StatusNorm};

    const MINUTE: i64 = 60_000;
    const NOW: i64 = 1_000 * MINUTE;

    async fn insert_processing(pool: &sqlx::SqlitePool, key: &str, locked_at: i64) -> i64 {
        let game = seed_game(pool, key, StatusNorm::Final, 0, (Some(1), Some(0))).await;
        sqlx::query_scalar(
            r#"INSERT INTO settlement_queue
               (game_id, league, external_game_id, provider, status, outcome, attempts, locked_by, locked_at, created_at, updated_at)
               VALUES (?1, 'nfl', ?2, 'test', 'PROCESSING', 'HOME', 1, 'crashed', ?3, 0, ?3)
               RETURNING id"#,
        )
        .bind(game)
        .bind(key)
        .bind(locked_at)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn releases_only_locks_past_threshold() {
        let pool = connect_memory().await;
        let stale = insert_processing(&pool, "stale", NOW - 11 * MINUTE).await;
        let fresh = insert_processing(&pool, "fresh", NOW - 9 * MINUTE).await;

        let out = release_stale_processing_locks(&pool, NOW).await.unwrap();
        assert_eq!(out.released, 1);
        assert_eq!(out.queue_ids, vec![stale]);

        let stale_row = queue::get(&pool, stale).await.unwrap().unwrap();
        assert_eq!(stale_row.queue_status(), Some(QueueStatus::Queued));
        assert_eq!(stale_row.locked_by, None);
        assert_eq!(stale_row.locked_at, None);
        assert_eq!(stale_row.attempts, 1, "reclaim does not count as an attempt");

        let fresh_row = queue::get(&pool, fresh).await.unwrap().unwrap();
        assert_eq!(fresh_row.queue_status(), Some(QueueStatus::Processing));
        assert_eq!(fresh_row.locked_by.as_deref(), Some("crashed"));
    }

    #[tokio::test]
    async fn lock_exactly_at_threshold_is_kept() {
        let pool = connect_memory().await;
        let edge = insert_processing(&pool, "edge", NOW - 10 * MINUTE).await;

        let out = release_stale_processing_locks(&pool, NOW).await.unwrap();
        assert_eq!(out.released, 0);

        let out = release_stale_processing_locks(&pool, NOW + 1).await.unwrap();
        assert_eq!(out.queue_ids, vec![edge]);
    }

    #[tokio::test]
    async fn orphan_gets_exactly_one_row_with_winner() {
        let pool = connect_memory().await;
        let game = seed_game(&pool, "orphan", StatusNorm::Final, 0, (Some(1), Some(3))).await;

        let first = enqueue_orphaned_final_games(&pool, NOW).await.unwrap();
        assert_eq!(first.enqueued, 1);
        let second = enqueue_orphaned_final_games(&pool, NOW + MINUTE).await.unwrap();
        assert_eq!(second.enqueued, 0);

        let rows = queue::for_game(&pool, game).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].queue_status(), Some(QueueStatus::Queued));
        assert_eq!(rows[0].outcome.as_deref(), Some("AWAY"));

        let winner: Option<String> = sqlx::query_scalar("SELECT winner_side FROM sports_games WHERE id = ?")
            .bind(game)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(winner.as_deref(), Some("AWAY"));
    }

    #[tokio::test]
    async fn winners_for_home_and_draw() {
        let pool = connect_memory().await;
        let home = seed_game(&pool, "home", StatusNorm::Final, 0, (Some(3), Some(1))).await;
        let draw = seed_game(&pool, "draw", StatusNorm::Final, 0, (Some(2), Some(2))).await;

        enqueue_orphaned_final_games(&pool, NOW).await.unwrap();
        assert_eq!(queue::for_game(&pool, home).await.unwrap()[0].outcome.as_deref(), Some("HOME"));
        assert_eq!(queue::for_game(&pool, draw).await.unwrap()[0].outcome.as_deref(), Some("DRAW"));
    }

    #[tokio::test]
    async fn missing_score_creates_no_row() {
        let pool = connect_memory().await;
        let game = seed_game(&pool, "noscore", StatusNorm::Final, 0, (Some(2), None)).await;

        let out = enqueue_orphaned_final_games(&pool, NOW).await.unwrap();
        assert_eq!(out.enqueued, 0);
        assert_eq!(out.skipped_missing_scores, 1);
        assert!(queue::for_game(&pool, game).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn winner_update_failure_leaves_no_queue_row() {
        let pool = connect_memory().await;
        let game = seed_game(&pool, "g", StatusNorm::Final, 0, (Some(3), Some(1))).await;
        sqlx::query(
            "CREATE TRIGGER block_winner BEFORE UPDATE OF winner_side ON sports_games \
             BEGIN SELECT RAISE(ABORT, 'winner_side locked'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        assert!(enqueue_orphaned_final_games(&pool, NOW).await.is_err());
        assert!(queue::for_game(&pool, game).await.unwrap().is_empty());

        sqlx::query("DROP TRIGGER block_winner").execute(&pool).await.unwrap();
        let out = enqueue_orphaned_final_games(&pool, NOW).await.unwrap();
        assert_eq!(out.enqueued, 1);
    }

    #[tokio::test]
    async fn failed_and_settled_games_are_left_alone() {
        let pool = connect_memory().await;
        let failed = insert_processing(&pool, "failed", NOW).await;
        sqlx::query("UPDATE settlement_queue SET status = 'FAILED', attempts = 5 WHERE id = ?")
            .bind(failed)
            .execute(&pool)
            .await
            .unwrap();
        let settled = seed_game(&pool, "settled", StatusNorm::Final, 0, (Some(1), Some(0))).await;
        sqlx::query("UPDATE sports_games SET settled_at = 1 WHERE id = ?")
            .bind(settled)
            .execute(&pool)
            .await
            .unwrap();
        seed_game(&pool, "live", StatusNorm::Live, 0, (Some(1), Some(0))).await;

        let out = enqueue_orphaned_final_games(&pool, NOW).await.unwrap();
        assert_eq!(out.enqueued, 0);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settlement_queue")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(total, 1);
    }
}
