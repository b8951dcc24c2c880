use crate::clock::{Clock, SystemClock};
use crate::error::{AppError, Result};

pub const FEED_BASE_URL: &str = "http://127.0.0.1:8088";

/// Header carrying the shared secret for lifecycle/admin routes.
pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

/// Channel capacity for internal message routing.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Sync + finalize cadence (seconds).
pub const FAST_JOB_INTERVAL_SECS: u64 = 120;

/// Discover + health sweep cadence (seconds).
pub const SLOW_JOB_INTERVAL_SECS: u64 = 600;

/// Days ahead the discover job looks for new fixtures.
pub const DISCOVER_DAYS_AHEAD: i64 = 3;

/// Longest inclusive range accepted by the backfill trigger.
pub const BACKFILL_MAX_DAYS: i64 = 31;
/// Days fetched between lease renewals during a backfill.
pub const BACKFILL_BATCH_DAYS: usize = 7;

/// Outbound feed request timeout (seconds).
pub const FEED_TIMEOUT_SECS: u64 = 15;

/// Attempts per feed request (first try included).
pub const FEED_MAX_ATTEMPTS: u32 = 3;

/// Base delay for the exponential feed retry backoff (milliseconds).
pub const FEED_BACKOFF_BASE_MS: u64 = 500;

/// Feed response cache policy.
pub const FEED_CACHE_TTL_SECS: u64 = 60;
pub const FEED_CACHE_CAPACITY: usize = 256;

/// Lock TTL used when LOCK_TTL_SECS is unset (seconds).
pub const DEFAULT_LOCK_TTL_SECS: u64 = 300;

/// Staleness thresholds for lifecycle checks and repairs.
pub mod staleness {
    const MINUTE_MS: i64 = 60 * 1_000;
    const HOUR_MS: i64 = 60 * MINUTE_MS;

    /// LIVE games past start by more than this without finalization.
    pub const STUCK_LIVE_MS: i64 = 6 * HOUR_MS;
    /// SCHEDULED games past start by more than this without finalization.
    pub const STUCK_SCHEDULED_MS: i64 = 8 * HOUR_MS;
    /// QUEUED/PROCESSING entries not modified for this long.
    pub const STUCK_QUEUE_MS: i64 = 30 * MINUTE_MS;
    /// PROCESSING locks older than this belong to a crashed worker.
    pub const STALE_PROCESSING_LOCK_MS: i64 = 10 * MINUTE_MS;
    /// FAILED entries at or above this attempt count need manual intervention.
    pub const MAX_SETTLEMENT_ATTEMPTS: i64 = 5;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Shared secret for lifecycle/admin routes (CRON_SECRET). Unset = those routes refuse everything.
    pub cron_secret: Option<String>,
    /// Identity recorded as `locked_by` in job_locks and settlement_queue (WORKER_ID).
    pub worker_id: String,
    pub feed_base_url: String,
    pub feed_api_key: Option<String>,
    /// Provider label stored on ingested games (FEED_PROVIDER).
    pub feed_provider: String,
    /// Leagues to sync (LEAGUES, comma-separated). Example: "nfl,nba,epl"
    pub leagues: Vec<String>,
    pub lock_ttl_secs: u64,
    pub scheduler_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let lock_ttl_secs = std::env::var("LOCK_TTL_SECS")
            .unwrap_or_else(|_| DEFAULT_LOCK_TTL_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| AppError::Config("LOCK_TTL_SECS must be a whole number of seconds".to_string()))?;
        if lock_ttl_secs == 0 {
            return Err(AppError::Config("LOCK_TTL_SECS must be greater than zero".to_string()));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "lifecycle.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            cron_secret: std::env::var("CRON_SECRET")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            worker_id: std::env::var("WORKER_ID")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| {
                    default_worker_id(
                        hostname().as_deref(),
                        std::process::id(),
                        SystemClock.now_ms(),
                    )
                }),
            feed_base_url: std::env::var("FEED_BASE_URL")
                .unwrap_or_else(|_| FEED_BASE_URL.to_string()),
            feed_api_key: std::env::var("FEED_API_KEY").ok().filter(|s| !s.is_empty()),
            feed_provider: std::env::var("FEED_PROVIDER").unwrap_or_else(|_| "api-sports".to_string()),
            leagues: std::env::var("LEAGUES")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            lock_ttl_secs,
            scheduler_enabled: parse_bool(
                &std::env::var("SCHEDULER_ENABLED").unwrap_or_else(|_| "true".to_string()),
            )
            .ok_or_else(|| AppError::Config("SCHEDULER_ENABLED must be true or false".to_string()))?,
        })
    }

    pub fn lock_ttl_ms(&self) -> i64 {
        (self.lock_ttl_secs as i64).saturating_mul(1_000)
    }
}

/// Containers commonly share pid 1, so the pid alone is not enough to tell
/// two lease holders apart.
fn default_worker_id(host: Option<&str>, pid: u32, started_ms: i64) -> String {
    let host = host.map(str::trim).filter(|h| !h.is_empty()).unwrap_or("worker");
    format!("{host}-{pid}-{started_ms:x}")
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
