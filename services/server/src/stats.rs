//! Thread-safe statistics core (§4.9): connection/message counters, a
//! recent-errors ring, a processing-time sample ring, and a health rollup.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

const RECENT_ERRORS_CAPACITY: usize = 100;
const PROCESSING_TIME_SAMPLES_CAPACITY: usize = 1_000;
const TOP_N_SOURCE_IPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentError {
    pub at_millis_ago: u64,
    pub kind: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingTimeSummary {
    pub count: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub sum_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub active_connections: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub messages_by_type: HashMap<String, u64>,
    pub messages_by_outcome: HashMap<String, u64>,
    pub errors_by_kind: HashMap<String, u64>,
    pub recent_errors: Vec<RecentError>,
    pub processing_time: ProcessingTimeSummary,
    pub top_source_ips: Vec<(String, u64)>,
    pub health: HealthStatus,
}

struct ErrorEntry {
    at: Instant,
    kind: String,
    detail: String,
}

/// Ring buffer over a fixed capacity, dropping the oldest entry once full.
struct Ring<T> {
    capacity: usize,
    items: std::collections::VecDeque<T>,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        Ring {
            capacity,
            items: std::collections::VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }
}

struct Inner {
    started_at: Instant,
    connections_opened: u64,
    connections_closed: u64,
    active_connections: u64,
    messages_received: u64,
    messages_sent: u64,
    messages_by_type: HashMap<String, u64>,
    messages_by_outcome: HashMap<String, u64>,
    errors_by_kind: HashMap<String, u64>,
    recent_errors: Ring<ErrorEntry>,
    processing_times: Ring<Duration>,
    source_ip_counts: HashMap<String, u64>,
    dns_provider_alive: bool,
}

/// Lock-protected counters and rolling windows shared across every
/// connection handler, the liveness monitor, and the read-only query
/// surface. Cloning a handle is cheap -- it shares the same inner state.
#[derive(Clone)]
pub struct Statistics {
    inner: std::sync::Arc<std::sync::Mutex<Inner>>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Statistics {
            inner: std::sync::Arc::new(std::sync::Mutex::new(Inner {
                started_at: Instant::now(),
                connections_opened: 0,
                connections_closed: 0,
                active_connections: 0,
                messages_received: 0,
                messages_sent: 0,
                messages_by_type: HashMap::new(),
                messages_by_outcome: HashMap::new(),
                errors_by_kind: HashMap::new(),
                recent_errors: Ring::new(RECENT_ERRORS_CAPACITY),
                processing_times: Ring::new(PROCESSING_TIME_SAMPLES_CAPACITY),
                source_ip_counts: HashMap::new(),
                dns_provider_alive: true,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("statistics mutex poisoned")
    }

    pub fn record_connection_opened(&self, source_ip: &str) {
        let mut inner = self.lock();
        inner.connections_opened += 1;
        inner.active_connections += 1;
        *inner.source_ip_counts.entry(source_ip.to_owned()).or_insert(0) += 1;
    }

    pub fn record_connection_closed(&self) {
        let mut inner = self.lock();
        inner.connections_closed += 1;
        inner.active_connections = inner.active_connections.saturating_sub(1);
    }

    pub fn record_message_received(&self) {
        self.lock().messages_received += 1;
    }

    pub fn record_message_sent(&self) {
        self.lock().messages_sent += 1;
    }

    pub fn record_message_type(&self, message_type: &str) {
        let mut inner = self.lock();
        *inner.messages_by_type.entry(message_type.to_owned()).or_insert(0) += 1;
    }

    pub fn record_outcome(&self, outcome: &str) {
        let mut inner = self.lock();
        *inner.messages_by_outcome.entry(outcome.to_owned()).or_insert(0) += 1;
    }

    pub fn record_error(&self, kind: &str, detail: impl Into<String>) {
        let mut inner = self.lock();
        *inner.errors_by_kind.entry(kind.to_owned()).or_insert(0) += 1;
        inner.recent_errors.push(ErrorEntry {
            at: Instant::now(),
            kind: kind.to_owned(),
            detail: detail.into(),
        });
    }

    pub fn record_processing_time(&self, elapsed: Duration) {
        self.lock().processing_times.push(elapsed);
    }

    pub fn set_dns_provider_alive(&self, alive: bool) {
        self.lock().dns_provider_alive = alive;
    }

    pub fn active_connections(&self) -> u64 {
        self.lock().active_connections
    }

    /// Point-in-time snapshot suitable for the read-only query surface.
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();

        let samples: Vec<f64> = inner
            .processing_times
            .items
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        let processing_time = if samples.is_empty() {
            ProcessingTimeSummary {
                count: 0,
                min_ms: 0.0,
                max_ms: 0.0,
                mean_ms: 0.0,
                sum_ms: 0.0,
            }
        } else {
            let sum: f64 = samples.iter().sum();
            ProcessingTimeSummary {
                count: samples.len(),
                min_ms: samples.iter().cloned().fold(f64::INFINITY, f64::min),
                max_ms: samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                mean_ms: sum / samples.len() as f64,
                sum_ms: sum,
            }
        };

        let mut top_source_ips: Vec<(String, u64)> = inner
            .source_ip_counts
            .iter()
            .map(|(ip, n)| (ip.clone(), *n))
            .collect();
        top_source_ips.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_source_ips.truncate(TOP_N_SOURCE_IPS);

        let recent_errors = inner
            .recent_errors
            .items
            .iter()
            .map(|e| RecentError {
                at_millis_ago: e.at.elapsed().as_millis() as u64,
                kind: e.kind.clone(),
                detail: e.detail.clone(),
            })
            .collect();

        let error_rate = if inner.messages_received == 0 {
            0.0
        } else {
            let total_errors: u64 = inner.errors_by_kind.values().sum();
            total_errors as f64 / inner.messages_received as f64
        };

        let health = if error_rate > 0.10
            || processing_time.mean_ms > 100.0
            || !inner.dns_provider_alive
        {
            HealthStatus::Degraded
        } else if inner.active_connections > 500 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        StatsSnapshot {
            uptime_secs: inner.started_at.elapsed().as_secs(),
            connections_opened: inner.connections_opened,
            connections_closed: inner.connections_closed,
            active_connections: inner.active_connections,
            messages_received: inner.messages_received,
            messages_sent: inner.messages_sent,
            messages_by_type: inner.messages_by_type.clone(),
            messages_by_outcome: inner.messages_by_outcome.clone(),
            errors_by_kind: inner.errors_by_kind.clone(),
            recent_errors,
            processing_time,
            top_source_ips,
            health,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_healthy_by_default() {
        let stats = Statistics::new();
        assert_eq!(stats.snapshot().health, HealthStatus::Healthy);
    }

    #[test]
    fn high_error_rate_degrades_health() {
        let stats = Statistics::new();
        for _ in 0..10 {
            stats.record_message_received();
        }
        for _ in 0..2 {
            stats.record_error("validation", "bad hostname");
        }
        assert_eq!(stats.snapshot().health, HealthStatus::Degraded);
    }

    #[test]
    fn many_active_connections_warns() {
        let stats = Statistics::new();
        for i in 0..501 {
            stats.record_connection_opened(&format!("10.0.0.{}", i % 250));
        }
        assert_eq!(stats.snapshot().health, HealthStatus::Warning);
    }

    #[test]
    fn dead_dns_provider_degrades_health() {
        let stats = Statistics::new();
        stats.set_dns_provider_alive(false);
        assert_eq!(stats.snapshot().health, HealthStatus::Degraded);
    }

    #[test]
    fn recent_errors_ring_drops_oldest_past_capacity() {
        let stats = Statistics::new();
        for i in 0..150 {
            stats.record_error("store", format!("failure {i}"));
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.recent_errors.len(), RECENT_ERRORS_CAPACITY);
        assert_eq!(snapshot.recent_errors[0].detail, "failure 50");
    }

    #[test]
    fn processing_time_summary_computes_min_max_mean() {
        let stats = Statistics::new();
        stats.record_processing_time(Duration::from_millis(10));
        stats.record_processing_time(Duration::from_millis(20));
        stats.record_processing_time(Duration::from_millis(30));
        let summary = stats.snapshot().processing_time;
        assert_eq!(summary.count, 3);
        assert!((summary.min_ms - 10.0).abs() < 0.5);
        assert!((summary.max_ms - 30.0).abs() < 0.5);
        assert!((summary.mean_ms - 20.0).abs() < 0.5);
    }

    #[test]
    fn top_source_ips_ranked_by_connection_count() {
        let stats = Statistics::new();
        stats.record_connection_opened("10.0.0.1");
        stats.record_connection_opened("10.0.0.1");
        stats.record_connection_opened("10.0.0.2");
        let top = stats.snapshot().top_source_ips;
        assert_eq!(top[0], ("10.0.0.1".to_owned(), 2));
    }

    #[test]
    fn messages_by_type_counts_per_type() {
        let stats = Statistics::new();
        stats.record_message_type("registration");
        stats.record_message_type("registration");
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_by_type.get("registration"), Some(&2));
    }

    #[test]
    fn active_connections_tracks_open_and_close() {
        let stats = Statistics::new();
        stats.record_connection_opened("10.0.0.1");
        stats.record_connection_opened("10.0.0.2");
        stats.record_connection_closed();
        assert_eq!(stats.active_connections(), 1);
    }
}
