//! In-memory duration histograms for scheduled and triggered jobs.
//! The job runner records, the API reads.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::types::JobName;

/// One histogram. Values stored in milliseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

impl LatencyStats {
    /// Tracks 1ms to 1h, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 3_600_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record_ms(&self, ms: u64) {
        if let Ok(mut h) = self.inner.lock() {
            h.saturating_record(ms.max(1));
        }
    }

    pub fn record(&self, d: Duration) {
        let ms = d.as_millis().min(u128::from(u64::MAX)) as u64;
        self.record_ms(ms);
    }

    /// Return (p50_ms, p95_ms, p99_ms). None if no samples.
    pub fn percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        let Ok(h) = self.inner.lock() else {
            return (None, None, None);
        };
        if h.len() == 0 {
            return (None, None, None);
        }
        (
            Some(h.value_at_quantile(0.5)),
            Some(h.value_at_quantile(0.95)),
            Some(h.value_at_quantile(0.99)),
        )
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobLatencySummary {
    pub job: JobName,
    pub runs: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

/// One histogram per job name, allocated up front so the map itself is never mutated.
pub struct JobStats {
    by_job: HashMap<JobName, LatencyStats>,
}

impl JobStats {
    pub fn new() -> Self {
        Self {
            by_job: JobName::ALL.into_iter().map(|j| (j, LatencyStats::new())).collect(),
        }
    }

    pub fn record(&self, job: JobName, d: Duration) {
        if let Some(stats) = self.by_job.get(&job) {
            stats.record(d);
        }
    }

    pub fn summary(&self) -> Vec<JobLatencySummary> {
        JobName::ALL
            .into_iter()
            .filter_map(|job| {
                let stats = self.by_job.get(&job)?;
                let (p50_ms, p95_ms, p99_ms) = stats.percentiles();
                Some(JobLatencySummary { job, runs: stats.len(), p50_ms, p95_ms, p99_ms })
            })
            .collect()
    }
}

impl Default for JobStats {
    fn default() -> Self {
        Self::new()
    }
}
