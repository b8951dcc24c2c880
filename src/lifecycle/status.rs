use tracing::{debug, warn};

use crate::error::Result;
use crate::types::StatusNorm;

/// Map a provider status string onto [`StatusNorm`].
///
/// Covers API-Sports short codes (`NS`, `1H`, `FT`, `PST`, ...) and
/// SportsDataIO words (`Scheduled`, `InProgress`, `F/OT`, ...). Matching is
/// case-insensitive. Unknown strings return `None`.
pub fn normalize_status(raw: &str) -> Option<StatusNorm> {
    let s = raw.trim().to_ascii_uppercase();
    let norm = match s.as_str() {
        "NS" | "TBD" | "SCHEDULED" | "NOT STARTED" | "PRE" | "PREGAME" | "DELAYED" => {
            StatusNorm::Scheduled
        }
        "1H" | "HT" | "2H" | "ET" | "BT" | "P" | "LIVE" | "INT" | "SUSP" | "Q1" | "Q2" | "Q3"
        | "Q4" | "OT" | "IN1" | "IN2" | "IN3" | "IN4" | "IN5" | "IN6" | "IN7" | "IN8" | "IN9"
        | "INPROGRESS" | "IN PROGRESS" | "IN_PROGRESS" | "SUSPENDED" | "HALFTIME" | "BREAK" => {
            StatusNorm::Live
        }
        // awarded, walkover and forfeited games have a decided result
        "FT" | "AET" | "PEN" | "AOT" | "AP" | "AWD" | "WO" | "FORFEIT" | "FINAL" | "F" | "F/OT"
        | "F/SO" | "FINISHED" | "COMPLETED" | "CLOSED" => StatusNorm::Final,
        "PST" | "CANC" | "ABD" | "POSTPONED" | "CANCELED" | "CANCELLED" | "ABANDONED"
        | "NOTNECESSARY" => StatusNorm::Cancelled,
        _ => return None,
    };
    Some(norm)
}

/// How a reported status relates to the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Forward,
    Unchanged,
    /// Backward (or sideways between terminal states) move on an unsettled game.
    Correction,
    /// Backward move on a settled game; the stored status is kept.
    RejectedCorrection,
}

pub fn resolve_transition(current: StatusNorm, reported: StatusNorm, settled: bool) -> Transition {
    if current == reported {
        Transition::Unchanged
    } else if reported.rank() > current.rank() {
        Transition::Forward
    } else if settled {
        Transition::RejectedCorrection
    } else {
        Transition::Correction
    }
}

/// One provider view of a game.
#[derive(Debug, Clone, PartialEq)]
pub struct GameObservation {
    pub league: String,
    pub external_game_id: String,
    pub provider: String,
    pub status_raw: String,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub starts_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(StatusNorm),
    Updated { status: StatusNorm, transition: Transition },
}

/// Apply an observation to `sports_games`, keyed by `(league, external_game_id)`.
///
/// Status changes follow [`resolve_transition`]; an unrecognized status keeps
/// whatever is stored (SCHEDULED for a new row). `finalized_at` is stamped the
/// first time the stored status becomes FINAL and is never overwritten.
pub async fn upsert_observation(
    pool: &sqlx::SqlitePool,
    obs: &GameObservation,
    now_ms: i64,
) -> Result<UpsertOutcome> {
    let existing: Option<(String, Option<i64>)> = sqlx::query_as(
        "SELECT status_norm, settled_at FROM sports_games WHERE league = ? AND external_game_id = ?",
    )
    .bind(&obs.league)
    .bind(&obs.external_game_id)
    .fetch_optional(pool)
    .await?;

    let reported = normalize_status(&obs.status_raw);
    if reported.is_none() {
        debug!(
            league = %obs.league,
            game = %obs.external_game_id,
            raw = %obs.status_raw,
            "unrecognized provider status, keeping stored status"
        );
    }

    let (status, outcome) = match existing {
        None => {
            let status = reported.unwrap_or(StatusNorm::Scheduled);
            (status, UpsertOutcome::Inserted(status))
        }
        Some((stored, settled_at)) => {
            let current = StatusNorm::parse(&stored).unwrap_or(StatusNorm::Scheduled);
            let transition = match reported {
                Some(r) => resolve_transition(current, r, settled_at.is_some()),
                None => Transition::Unchanged,
            };
            let status = match transition {
                Transition::Forward | Transition::Correction => reported.unwrap_or(current),
                Transition::Unchanged | Transition::RejectedCorrection => current,
            };
            match transition {
                Transition::Correction => warn!(
                    league = %obs.league,
                    game = %obs.external_game_id,
                    from = %current,
                    to = %status,
                    "provider corrected game status"
                ),
                Transition::RejectedCorrection => warn!(
                    league = %obs.league,
                    game = %obs.external_game_id,
                    from = %current,
                    reported = %obs.status_raw,
                    "ignoring backward status on settled game"
                ),
                _ => {}
            }
            (status, UpsertOutcome::Updated { status, transition })
        }
    };

    let finalized_at = (status == StatusNorm::Final).then_some(now_ms);

    sqlx::query(
        r#"
        INSERT INTO sports_games (
            league, external_game_id, provider, status_norm, status_raw,
            home_team, away_team, home_score, away_score, starts_at,
            finalized_at, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
        ON CONFLICT(league, external_game_id) DO UPDATE SET
            provider = excluded.provider,
            status_norm = excluded.status_norm,
            status_raw = excluded.status_raw,
            home_team = COALESCE(excluded.home_team, sports_games.home_team),
            away_team = COALESCE(excluded.away_team, sports_games.away_team),
            home_score = COALESCE(excluded.home_score, sports_games.home_score),
            away_score = COALESCE(excluded.away_score, sports_games.away_score),
            starts_at = excluded.starts_at,
            finalized_at = COALESCE(sports_games.finalized_at, excluded.finalized_at),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&obs.league)
    .bind(&obs.external_game_id)
    .bind(&obs.provider)
    .bind(status.as_str())
    .bind(&obs.status_raw)
    .bind(&obs.home_team)
    .bind(&obs.away_team)
    .bind(obs.home_score)
    .bind(obs.away_score)
    .bind(obs.starts_at)
    .bind(finalized_at)
    .bind(now_ms)
    .execute(pool)
    .await?;

    Ok(outcome)
}

/// Stamp `finalized_at` on FINAL games that lack it (rows written by other
/// ingesters). Returns the number of games stamped.
pub async fn stamp_unfinalized_finals(pool: &sqlx::SqlitePool, now_ms: i64) -> Result<u64> {
    let res = sqlx::query(
        r#"
        UPDATE sports_games
        SET finalized_at = ?1, updated_at = ?1
        WHERE status_norm = 'FINAL' AND finalized_at IS NULL
        "#,
    )
    .bind(now_ms)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;
    use crate::db::models::GameRow;

    fn obs(status: &str, home: Option<i64>, away: Option<i64>) -> GameObservation {
        GameObservation {
            league: "epl".to_string(),
            external_game_id: "g-1".to_string(),
            provider: "api-sports".to_string(),
            status_raw: status.to_string(),
            home_team: Some("Arsenal".to_string()),
            away_team: Some("Chelsea".to_string()),
            home_score: home,
            away_score: away,
            starts_at: 1_000,
        }
    }

    async fn load(pool: &sqlx::SqlitePool) -> GameRow {
        sqlx::query_as("SELECT * FROM sports_games WHERE external_game_id = 'g-1'")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[test]
    fn normalizes_both_provider_vocabularies() {
        assert_eq!(normalize_status("NS"), Some(StatusNorm::Scheduled));
        assert_eq!(normalize_status("Scheduled"), Some(StatusNorm::Scheduled));
        assert_eq!(normalize_status("2H"), Some(StatusNorm::Live));
        assert_eq!(normalize_status("InProgress"), Some(StatusNorm::Live));
        assert_eq!(normalize_status("ft"), Some(StatusNorm::Final));
        assert_eq!(normalize_status("F/OT"), Some(StatusNorm::Final));
        assert_eq!(normalize_status("PST"), Some(StatusNorm::Cancelled));
        assert_eq!(normalize_status("AWD"), Some(StatusNorm::Final));
        assert_eq!(normalize_status("wo"), Some(StatusNorm::Final));
        assert_eq!(normalize_status("Canceled"), Some(StatusNorm::Cancelled));
        assert_eq!(normalize_status("???"), None);
    }

    #[test]
    fn transitions() {
        use StatusNorm::*;
        assert_eq!(resolve_transition(Scheduled, Live, false), Transition::Forward);
        assert_eq!(resolve_transition(Live, Live, false), Transition::Unchanged);
        assert_eq!(resolve_transition(Final, Live, false), Transition::Correction);
        assert_eq!(resolve_transition(Final, Live, true), Transition::RejectedCorrection);
        assert_eq!(resolve_transition(Final, Cancelled, false), Transition::Correction);
    }

    #[tokio::test]
    async fn first_sight_inserts_then_progresses() {
        let pool = connect_memory().await;

        let first = upsert_observation(&pool, &obs("NS", None, None), 100).await.unwrap();
        assert_eq!(first, UpsertOutcome::Inserted(StatusNorm::Scheduled));

        upsert_observation(&pool, &obs("1H", Some(1), Some(0)), 200).await.unwrap();
        let row = load(&pool).await;
        assert_eq!(row.status(), Some(StatusNorm::Live));
        assert_eq!(row.home_score, Some(1));
        assert_eq!(row.finalized_at, None);
        assert_eq!(row.created_at, 100);
        assert_eq!(row.updated_at, 200);
    }

    #[tokio::test]
    async fn finalized_at_is_set_once() {
        let pool = connect_memory().await;
        upsert_observation(&pool, &obs("FT", Some(2), Some(1)), 500).await.unwrap();
        upsert_observation(&pool, &obs("FT", Some(2), Some(1)), 900).await.unwrap();

        assert_eq!(load(&pool).await.finalized_at, Some(500));
    }

    #[tokio::test]
    async fn correction_keeps_finalized_at_and_settled_games_refuse_it() {
        let pool = connect_memory().await;
        upsert_observation(&pool, &obs("FT", Some(2), Some(1)), 500).await.unwrap();

        let out = upsert_observation(&pool, &obs("2H", Some(2), Some(1)), 600).await.unwrap();
        assert_eq!(
            out,
            UpsertOutcome::Updated { status: StatusNorm::Live, transition: Transition::Correction }
        );
        let row = load(&pool).await;
        assert_eq!(row.status(), Some(StatusNorm::Live));
        assert_eq!(row.finalized_at, Some(500));

        upsert_observation(&pool, &obs("FT", Some(3), Some(1)), 700).await.unwrap();
        sqlx::query("UPDATE sports_games SET settled_at = 800").execute(&pool).await.unwrap();

        let out = upsert_observation(&pool, &obs("HT", Some(3), Some(1)), 900).await.unwrap();
        assert_eq!(
            out,
            UpsertOutcome::Updated {
                status: StatusNorm::Final,
                transition: Transition::RejectedCorrection
            }
        );
        assert_eq!(load(&pool).await.status(), Some(StatusNorm::Final));
    }

    #[tokio::test]
    async fn unknown_status_and_missing_scores_keep_stored_values() {
        let pool = connect_memory().await;
        upsert_observation(&pool, &obs("1H", Some(1), Some(1)), 100).await.unwrap();
        upsert_observation(&pool, &obs("WEIRD", None, None), 200).await.unwrap();

        let row = load(&pool).await;
        assert_eq!(row.status(), Some(StatusNorm::Live));
        assert_eq!(row.status_raw.as_deref(), Some("WEIRD"));
        assert_eq!((row.home_score, row.away_score), (Some(1), Some(1)));
    }

    #[tokio::test]
    async fn stamps_final_rows_missing_finalized_at() {
        let pool = connect_memory().await;
        crate::db::seed_game(&pool, "x", StatusNorm::Final, 0, (Some(1), Some(0))).await;
        crate::db::seed_game(&pool, "y", StatusNorm::Live, 0, (None, None)).await;

        assert_eq!(stamp_unfinalized_finals(&pool, 42).await.unwrap(), 1);
        assert_eq!(stamp_unfinalized_finals(&pool, 43).await.unwrap(), 0);
    }
}
