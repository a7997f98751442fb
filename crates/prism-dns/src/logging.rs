use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{DeleteOutcome, DnsError, DnsProvider, UpsertOutcome};

/// One recorded call against a [`LoggingDnsProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsLedgerEntry {
    pub at: DateTime<Utc>,
    pub hostname: String,
    pub zone: String,
    pub operation: String,
}

/// A provider that always succeeds (like [`crate::DisabledDnsProvider`]) but
/// additionally records every call at info level and in an in-memory ledger.
///
/// Useful for tests and for the read-only query surface's DNS-activity view.
#[derive(Default)]
pub struct LoggingDnsProvider {
    ledger: Mutex<Vec<DnsLedgerEntry>>,
}

impl LoggingDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every call recorded so far, oldest first.
    pub fn ledger(&self) -> Vec<DnsLedgerEntry> {
        self.ledger.lock().expect("ledger mutex poisoned").clone()
    }

    fn record(&self, hostname: &str, zone: &str, operation: &str) {
        let entry = DnsLedgerEntry {
            at: Utc::now(),
            hostname: hostname.to_owned(),
            zone: zone.to_owned(),
            operation: operation.to_owned(),
        };
        tracing::info!(
            hostname = %entry.hostname,
            zone = %entry.zone,
            operation = %entry.operation,
            "dns provider call"
        );
        self.ledger
            .lock()
            .expect("ledger mutex poisoned")
            .push(entry);
    }
}

#[async_trait]
impl DnsProvider for LoggingDnsProvider {
    async fn ensure_record(
        &self,
        hostname: &str,
        zone: &str,
        ip: IpAddr,
        _ttl: Duration,
    ) -> Result<UpsertOutcome, DnsError> {
        self.record(hostname, zone, &format!("ensure_record({ip})"));
        Ok(UpsertOutcome::Updated)
    }

    async fn delete_record(&self, hostname: &str, zone: &str) -> Result<DeleteOutcome, DnsError> {
        self.record(hostname, zone, "delete_record");
        Ok(DeleteOutcome::Deleted)
    }

    async fn zone_exists(&self, zone: &str) -> Result<bool, DnsError> {
        self.record("-", zone, "zone_exists");
        Ok(true)
    }
}
