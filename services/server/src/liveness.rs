//! Periodic liveness sweep (§4.8): marks hosts offline after they miss
//! `liveness_timeout`, then applies the DNS retraction policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use prism_config::RetractionPolicy;
use prism_dns::DnsProvider;
use prism_store::HostStore;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::stats::Statistics;

/// `max(heartbeat_interval * 2.5, 90s)` -- tolerates one missed heartbeat
/// plus network jitter (§4.8).
pub fn default_liveness_timeout(heartbeat_interval: Duration) -> Duration {
    let scaled = heartbeat_interval.mul_f64(2.5);
    scaled.max(Duration::from_secs(90))
}

pub struct LivenessMonitor<S: HostStore> {
    store: Arc<Mutex<S>>,
    dns: Arc<dyn DnsProvider>,
    stats: Statistics,
    sweep_interval: Duration,
    liveness_timeout: Duration,
    retraction_policy: RetractionPolicy,
}

impl<S: HostStore> LivenessMonitor<S> {
    pub fn new(
        store: Arc<Mutex<S>>,
        dns: Arc<dyn DnsProvider>,
        stats: Statistics,
        heartbeat_interval: Duration,
        liveness_timeout: Duration,
        retraction_policy: RetractionPolicy,
    ) -> Self {
        LivenessMonitor {
            store,
            dns,
            stats,
            sweep_interval: heartbeat_interval / 2,
            liveness_timeout,
            retraction_policy,
        }
    }

    /// Runs sweeps on `sweep_interval` until `shutdown` carries `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.sweep_interval.max(Duration::from_millis(1)));
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// One sweep: find stale online hosts, mark them offline, apply the
    /// retraction policy.
    pub async fn sweep(&self) {
        let cutoff = Utc::now() - self.liveness_timeout;
        let stale = {
            let mut store = self.store.lock().await;
            match store.list_stale(cutoff) {
                Ok(hosts) => hosts,
                Err(e) => {
                    self.stats.record_error("store", e.to_string());
                    return;
                }
            }
        };

        for host in stale {
            let marked = {
                let mut store = self.store.lock().await;
                store.mark_offline(&host.hostname)
            };
            match marked {
                Ok(true) => {
                    info!(hostname = %host.hostname, "host transitioned offline");
                    self.stats.record_outcome("host_offline");
                }
                Ok(false) => continue,
                Err(e) => {
                    self.stats.record_error("store", e.to_string());
                    continue;
                }
            }

            if self.retraction_policy == RetractionPolicy::Remove {
                if let Some(zone) = &host.dns_zone {
                    if let Err(e) = self.dns.delete_record(&host.hostname, zone).await {
                        warn!(hostname = %host.hostname, error = %e, "failed to retract dns record");
                        self.stats.record_error("dns", e.to_string());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_dns::LoggingDnsProvider;
    use prism_store::SqliteHostStore;

    async fn seeded_store() -> Arc<Mutex<SqliteHostStore>> {
        let mut store = SqliteHostStore::open_in_memory().unwrap();
        let old = Utc::now() - chrono::Duration::seconds(1000);
        store.create("stale-host", "10.0.0.1", Some("example.com"), old).unwrap();
        Arc::new(Mutex::new(store))
    }

    #[test]
    fn default_timeout_applies_floor_for_short_intervals() {
        assert_eq!(
            default_liveness_timeout(Duration::from_secs(10)),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn default_timeout_scales_for_long_intervals() {
        assert_eq!(
            default_liveness_timeout(Duration::from_secs(60)),
            Duration::from_secs(150)
        );
    }

    #[tokio::test]
    async fn sweep_marks_stale_host_offline() {
        let store = seeded_store().await;
        let dns = Arc::new(LoggingDnsProvider::new());
        let monitor = LivenessMonitor::new(
            Arc::clone(&store),
            dns,
            Statistics::new(),
            Duration::from_secs(60),
            Duration::from_secs(150),
            RetractionPolicy::Keep,
        );
        monitor.sweep().await;

        let mut store = store.lock().await;
        let host = store.get("stale-host").unwrap().unwrap();
        assert_eq!(host.status, prism_store::HostStatus::Offline);
    }

    #[tokio::test]
    async fn keep_policy_does_not_call_dns_delete() {
        let store = seeded_store().await;
        let dns = Arc::new(LoggingDnsProvider::new());
        let monitor = LivenessMonitor::new(
            Arc::clone(&store),
            Arc::clone(&dns) as Arc<dyn DnsProvider>,
            Statistics::new(),
            Duration::from_secs(60),
            Duration::from_secs(150),
            RetractionPolicy::Keep,
        );
        monitor.sweep().await;
        assert!(dns.ledger().is_empty());
    }

    #[tokio::test]
    async fn remove_policy_calls_dns_delete() {
        let store = seeded_store().await;
        let dns = Arc::new(LoggingDnsProvider::new());
        let monitor = LivenessMonitor::new(
            Arc::clone(&store),
            Arc::clone(&dns) as Arc<dyn DnsProvider>,
            Statistics::new(),
            Duration::from_secs(60),
            Duration::from_secs(150),
            RetractionPolicy::Remove,
        );
        monitor.sweep().await;
        let ledger = dns.ledger();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].operation, "delete_record");
    }

    #[tokio::test]
    async fn fresh_host_is_not_touched() {
        let mut store = SqliteHostStore::open_in_memory().unwrap();
        store.create("fresh-host", "10.0.0.2", None, Utc::now()).unwrap();
        let store = Arc::new(Mutex::new(store));
        let dns = Arc::new(LoggingDnsProvider::new());
        let monitor = LivenessMonitor::new(
            Arc::clone(&store),
            dns,
            Statistics::new(),
            Duration::from_secs(60),
            Duration::from_secs(150),
            RetractionPolicy::Keep,
        );
        monitor.sweep().await;
        let mut store = store.lock().await;
        assert_eq!(
            store.get("fresh-host").unwrap().unwrap().status,
            prism_store::HostStatus::Online
        );
    }
}
