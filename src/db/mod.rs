pub mod models;
pub mod writer;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

pub use writer::JobRunWriter;

/// Open (creating if needed) the on-disk database and apply migrations.
pub async fn connect(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory pool for tests. One connection only: every
/// new connection to `sqlite::memory:` would see its own empty database.
#[cfg(test)]
pub async fn connect_memory() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations apply");
    pool
}

/// Insert a game row directly, bypassing the ingestion rules. Test fixture.
#[cfg(test)]
pub async fn seed_game(
    pool: &SqlitePool,
    external_id: &str,
    status: crate::types::StatusNorm,
    starts_at: i64,
    scores: (Option<i64>, Option<i64>),
) -> i64 {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO sports_games (
            league, external_game_id, provider, status_norm,
            home_score, away_score, starts_at, created_at, updated_at
        ) VALUES ('nfl', ?1, 'test', ?2, ?3, ?4, ?5, ?5, ?5)
        RETURNING id
        "#,
    )
    .bind(external_id)
    .bind(status.as_str())
    .bind(scores.0)
    .bind(scores.1)
    .bind(starts_at)
    .fetch_one(pool)
    .await
    .expect("seed game");
    id
}
