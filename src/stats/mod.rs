use crate::core::retry::RetryCategory;
use crate::core::Disposition;
use chrono::{DateTime, Utc};
use log::info;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct HarvestStats {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub dispatched: usize,
    pub succeeded: usize,
    pub exhausted: usize,
    pub permanent: usize,
    pub retry_count: usize,
    pub bytes_downloaded: usize,
    pub status_codes: HashMap<u16, usize>,
    pub retry_reasons: HashMap<String, usize>,
    pub dispatches_per_key: HashMap<String, usize>,
    pub average_latency_ms: f64,
    latency_samples: usize,
}

/// Shared counters for one fetch run. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct StatsTracker {
    stats: Arc<RwLock<HarvestStats>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(RwLock::new(HarvestStats {
                start_time: Utc::now(),
                end_time: None,
                dispatched: 0,
                succeeded: 0,
                exhausted: 0,
                permanent: 0,
                retry_count: 0,
                bytes_downloaded: 0,
                status_codes: HashMap::new(),
                retry_reasons: HashMap::new(),
                dispatches_per_key: HashMap::new(),
                average_latency_ms: 0.0,
                latency_samples: 0,
            })),
        }
    }

    pub fn record_dispatch(&self, rate_key: &str) {
        let mut stats = self.stats.write();
        stats.dispatched += 1;
        *stats
            .dispatches_per_key
            .entry(rate_key.to_string())
            .or_insert(0) += 1;
    }

    /// Records a response that reached us, whatever its status.
    pub fn record_response(&self, status: u16, size: usize, latency: Duration) {
        let mut stats = self.stats.write();
        *stats.status_codes.entry(status).or_insert(0) += 1;
        stats.bytes_downloaded += size;

        stats.latency_samples += 1;
        let current_total = stats.average_latency_ms * (stats.latency_samples - 1) as f64;
        stats.average_latency_ms =
            (current_total + latency.as_secs_f64() * 1000.0) / stats.latency_samples as f64;
    }

    pub fn record_retry(&self, category: &RetryCategory) {
        let mut stats = self.stats.write();
        stats.retry_count += 1;
        *stats
            .retry_reasons
            .entry(format!("{:?}", category))
            .or_insert(0) += 1;
    }

    pub fn record_success(&self) {
        self.stats.write().succeeded += 1;
    }

    pub fn record_failure(&self, disposition: Disposition) {
        let mut stats = self.stats.write();
        match disposition {
            Disposition::Exhausted => stats.exhausted += 1,
            Disposition::Permanent => stats.permanent += 1,
        }
    }

    pub fn finish(&self) {
        self.stats.write().end_time = Some(Utc::now());
    }

    pub fn get_stats(&self) -> HarvestStats {
        self.stats.read().clone()
    }

    pub fn log_summary(&self) {
        let stats = self.stats.read();
        let duration = stats
            .end_time
            .unwrap_or_else(Utc::now)
            .signed_duration_since(stats.start_time);

        info!(
            "Fetch summary: {} dispatched in {}s, {} succeeded, {} exhausted, {} permanent, {} retries",
            stats.dispatched,
            duration.num_seconds(),
            stats.succeeded,
            stats.exhausted,
            stats.permanent,
            stats.retry_count
        );
        info!(
            "Downloaded {:.2} MB, average latency {:.2}ms",
            stats.bytes_downloaded as f64 / 1_000_000.0,
            stats.average_latency_ms
        );

        for (code, count) in &stats.status_codes {
            info!("  HTTP {}: {}", code, count);
        }
        for (reason, count) in &stats.retry_reasons {
            info!("  retry {}: {}", reason, count);
        }
        for (key, count) in &stats.dispatches_per_key {
            info!("  key {}: {} dispatches", key, count);
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}
