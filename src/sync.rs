use std::sync::Arc;

use chrono::{Days, NaiveDate};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::{BACKFILL_BATCH_DAYS, BACKFILL_MAX_DAYS, DISCOVER_DAYS_AHEAD};
use crate::error::{AppError, Result};
use crate::fetcher::FeedClient;
use crate::lifecycle::status::{upsert_observation, Transition, UpsertOutcome};
use crate::lifecycle::Lease;

#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub league: String,
    pub date: NaiveDate,
    pub error: String,
}

/// Counts for one sync/discover/backfill batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub items: usize,
    pub failed_items: usize,
    pub inserted: u64,
    pub updated: u64,
    pub corrections: u64,
    pub rejected_corrections: u64,
    pub failures: Vec<ItemFailure>,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.items += other.items;
        self.failed_items += other.failed_items;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.corrections += other.corrections;
        self.rejected_corrections += other.rejected_corrections;
        self.failures.extend(other.failures);
    }

    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted(_) => self.inserted += 1,
            UpsertOutcome::Updated { transition, .. } => {
                self.updated += 1;
                match transition {
                    Transition::Correction => self.corrections += 1,
                    Transition::RejectedCorrection => self.rejected_corrections += 1,
                    Transition::Forward | Transition::Unchanged => {}
                }
            }
        }
    }
}

/// Pulls schedules/scores from the feed and upserts them into `sports_games`.
pub struct GameSync {
    pool: sqlx::SqlitePool,
    feed: Arc<FeedClient>,
    leagues: Vec<String>,
    clock: Arc<dyn Clock>,
}

impl GameSync {
    pub fn new(
        pool: sqlx::SqlitePool,
        feed: Arc<FeedClient>,
        leagues: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { pool, feed, leagues, clock }
    }

    pub fn today(&self) -> NaiveDate {
        chrono::DateTime::from_timestamp_millis(self.clock.now_ms())
            .map(|t| t.date_naive())
            .unwrap_or_default()
    }

    /// Refresh today's games for every configured league.
    pub async fn sync_today(&self) -> Result<SyncReport> {
        let today = self.today();
        self.sync_dates(&self.leagues, &[today]).await
    }

    /// Look ahead for fixtures over the next few days.
    pub async fn discover(&self) -> Result<SyncReport> {
        let today = self.today();
        let dates: Vec<NaiveDate> = (1..=DISCOVER_DAYS_AHEAD)
            .filter_map(|d| today.checked_add_days(Days::new(d as u64)))
            .collect();
        self.sync_dates(&self.leagues, &dates).await
    }

    /// Re-ingest an inclusive date range for one league, in batches of
    /// [`BACKFILL_BATCH_DAYS`]. The lease is renewed before every batch after
    /// the first.
    pub async fn backfill(
        &self,
        league: &str,
        from: NaiveDate,
        to: NaiveDate,
        lease: &Lease,
    ) -> Result<SyncReport> {
        let dates = backfill_dates(from, to)?;
        let league = [league.trim().to_lowercase()];
        if league[0].is_empty() {
            return Err(AppError::InvalidInput("league must not be empty".to_string()));
        }

        let mut report = SyncReport::default();
        for (i, batch) in dates.chunks(BACKFILL_BATCH_DAYS).enumerate() {
            if i > 0 {
                lease.renew().await;
            }
            report.merge(self.sync_dates(&league, batch).await?);
        }
        Ok(report)
    }

    /// Every (league, date) is an independent item: a failed fetch is logged
    /// and counted, the rest of the batch continues. Database errors abort.
    pub async fn sync_dates(&self, leagues: &[String], dates: &[NaiveDate]) -> Result<SyncReport> {
        let items: Vec<(String, NaiveDate)> = leagues
            .iter()
            .flat_map(|l| dates.iter().map(move |d| (l.clone(), *d)))
            .collect();

        let fetched = join_all(items.iter().map(|(league, date)| async move {
            (league.clone(), *date, self.feed.fetch_games(league, *date).await)
        }))
        .await;

        let mut report = SyncReport { items: items.len(), ..SyncReport::default() };
        for (league, date, result) in fetched {
            let games = match result {
                Ok(g) => g,
                Err(e) => {
                    warn!(league = %league, %date, "feed fetch failed: {e}");
                    report.failed_items += 1;
                    report.failures.push(ItemFailure { league, date, error: e.to_string() });
                    continue;
                }
            };

            let now = self.clock.now_ms();
            for game in &games {
                let outcome = upsert_observation(&self.pool, game, now).await?;
                report.record(outcome);
            }
        }

        info!(
            items = report.items,
            failed = report.failed_items,
            inserted = report.inserted,
            updated = report.updated,
            corrections = report.corrections,
            "game sync complete"
        );
        Ok(report)
    }
}

fn backfill_dates(from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDate>> {
    if to < from {
        return Err(AppError::InvalidInput("backfill range ends before it starts".to_string()));
    }
    let days = (to - from).num_days() + 1;
    if days > BACKFILL_MAX_DAYS {
        return Err(AppError::InvalidInput(format!(
            "backfill range is {days} days, max is {BACKFILL_MAX_DAYS}"
        )));
    }
    Ok(from.iter_days().take(days as usize).collect())
}
