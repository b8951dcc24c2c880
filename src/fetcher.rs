use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::{
    Config, FEED_BACKOFF_BASE_MS, FEED_CACHE_CAPACITY, FEED_CACHE_TTL_SECS, FEED_MAX_ATTEMPTS,
    FEED_TIMEOUT_SECS,
};
use crate::error::{AppError, Result};
use crate::lifecycle::status::GameObservation;
use crate::state::TtlCache;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FeedResponse {
    games: Vec<FeedGame>,
}

/// Providers disagree on whether ids are numbers or strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FeedId {
    Num(i64),
    Str(String),
}

impl std::fmt::Display for FeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedId::Num(n) => write!(f, "{n}"),
            FeedId::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FeedGame {
    id: FeedId,
    status: String,
    home_team: Option<String>,
    away_team: Option<String>,
    home_score: Option<i64>,
    away_score: Option<i64>,
    /// RFC3339 kickoff time.
    starts_at: String,
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: FEED_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(FEED_BACKOFF_BASE_MS),
        }
    }
}

/// Timeouts, connection failures, 429 and 5xx are worth another try.
/// Client errors and malformed bodies are not.
fn is_transient(err: &AppError) -> bool {
    match err {
        AppError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        AppError::UpstreamStatus { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// FeedClient
// ---------------------------------------------------------------------------

/// Score/schedule feed client. One instance per process; the response cache
/// lives on the instance.
pub struct FeedClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    provider: String,
    retry: RetryPolicy,
    cache: TtlCache<String, Vec<GameObservation>>,
}

impl FeedClient {
    pub fn new(cfg: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_policy(
            cfg.feed_base_url.clone(),
            cfg.feed_api_key.clone(),
            cfg.feed_provider.clone(),
            RetryPolicy::default(),
            clock,
        )
    }

    pub fn with_policy(
        base_url: String,
        api_key: Option<String>,
        provider: String,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(FEED_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            provider,
            retry,
            cache: TtlCache::new(
                clock,
                (FEED_CACHE_TTL_SECS * 1_000) as i64,
                FEED_CACHE_CAPACITY,
            ),
        })
    }

    /// Games for one league on one calendar day (UTC).
    pub async fn fetch_games(&self, league: &str, date: NaiveDate) -> Result<Vec<GameObservation>> {
        let key = format!("{league}:{date}");
        if let Some(hit) = self.cache.get(&key) {
            debug!(league, %date, "feed cache hit");
            return Ok(hit);
        }

        let url = format!(
            "{}/games?league={}&date={}",
            self.base_url,
            league,
            date.format("%Y-%m-%d")
        );
        let resp = self.get_with_retry(&url).await?;

        let games: Vec<GameObservation> = resp
            .games
            .into_iter()
            .filter_map(|g| self.to_observation(league, g))
            .collect();

        self.cache.insert(key, games.clone());
        Ok(games)
    }

    async fn get_with_retry(&self, url: &str) -> Result<FeedResponse> {
        let mut attempt = 1u32;
        loop {
            match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < self.retry.max_attempts && is_transient(&e) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "feed request failed, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(&self, url: &str) -> Result<FeedResponse> {
        let mut req = self.http.get(url);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::UpstreamStatus { status: status.as_u16(), url: url.to_string() });
        }

        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    fn to_observation(&self, league: &str, g: FeedGame) -> Option<GameObservation> {
        let starts_at = match chrono::DateTime::parse_from_rfc3339(&g.starts_at) {
            Ok(t) => t.timestamp_millis(),
            Err(e) => {
                warn!(league, game = %g.id, raw = %g.starts_at, "skipping game with bad starts_at: {e}");
                return None;
            }
        };
        Some(GameObservation {
            league: league.to_string(),
            external_game_id: g.id.to_string(),
            provider: self.provider.clone(),
            status_raw: g.status,
            home_team: g.home_team,
            away_team: g.away_team,
            home_score: g.home_score,
            away_score: g.away_score,
            starts_at,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::{extract::State, http::StatusCode, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) const TWO_GAMES: &str = r#"{"games":[
        {"id":101,"status":"FT","home_team":"Lions","away_team":"Bears","home_score":24,"away_score":17,"starts_at":"2026-10-14T17:00:00Z"},
        {"id":"abc","status":"NS","home_team":"Jets","away_team":"Bills","home_score":null,"away_score":null,"starts_at":"2026-10-14T20:25:00+00:00"},
        {"id":103,"status":"NS","starts_at":"not a date"}
    ]}"#;

    /// Stub upstream that fails with `fail_status` for the first `failures` calls.
    pub(crate) async fn stub_feed(failures: usize, fail_status: u16, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/games",
                get(move |State(hits): State<Arc<AtomicUsize>>| async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        let status = StatusCode::from_u16(fail_status).unwrap();
                        (status, String::from("upstream sad"))
                    } else {
                        (StatusCode::OK, body.to_string())
                    }
                }),
            )
            .with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hits)
    }

    fn client(base_url: String) -> FeedClient {
        FeedClient::with_policy(
            base_url,
            Some("k".to_string()),
            "api-sports".to_string(),
            RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1) },
            Arc::new(ManualClock::new(0)),
        )
        .unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy { max_attempts: 4, base_delay: Duration::from_millis(500) };
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(3), Duration::from_millis(2_000));
    }

    #[tokio::test]
    async fn retries_server_errors_then_parses() {
        let (url, hits) = stub_feed(2, 503, TWO_GAMES).await;
        let games = client(url).fetch_games("nfl", day()).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(games.len(), 2, "row with bad starts_at is dropped");
        assert_eq!(games[0].external_game_id, "101");
        assert_eq!(games[0].home_score, Some(24));
        assert_eq!(games[1].external_game_id, "abc");
        assert_eq!(games[1].league, "nfl");
        assert_eq!(games[0].starts_at, 1_791_997_200_000);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (url, hits) = stub_feed(10, 500, TWO_GAMES).await;
        let err = client(url).fetch_games("nfl", day()).await.unwrap_err();

        assert!(matches!(err, AppError::UpstreamStatus { status: 500, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, hits) = stub_feed(10, 404, TWO_GAMES).await;
        let err = client(url).fetch_games("nfl", day()).await.unwrap_err();

        assert!(matches!(err, AppError::UpstreamStatus { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_json_is_not_retried() {
        let (url, hits) = stub_feed(0, 500, "{\"games\": nope").await;
        let err = client(url).fetch_games("nfl", day()).await.unwrap_err();

        assert!(matches!(err, AppError::Json(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn responses_are_cached_per_league_and_day() {
        let (url, hits) = stub_feed(0, 500, TWO_GAMES).await;
        let c = client(url);
        c.fetch_games("nfl", day()).await.unwrap();
        c.fetch_games("nfl", day()).await.unwrap();
        c.fetch_games("nba", day()).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
