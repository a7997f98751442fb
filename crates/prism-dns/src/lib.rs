//! The `DnsProvider` port: propagation of a host's A/AAAA record into an
//! authoritative zone, plus the `Disabled` and `Logging` implementations.

mod disabled;
mod logging;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

pub use disabled::DisabledDnsProvider;
pub use logging::{DnsLedgerEntry, LoggingDnsProvider};

/// Outcome of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Outcome of a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DnsError {
    #[error("dns provider unreachable: {0}")]
    Unreachable(String),
    #[error("dns provider rejected credentials: {0}")]
    AuthFailed(String),
    #[error("dns zone missing: {0}")]
    ZoneMissing(String),
    #[error("dns provider rejected the request: {0}")]
    Rejected(String),
    #[error("transient dns failure: {0}")]
    Transient(String),
}

impl DnsError {
    /// §4.5/§4.12: only `Transient` failures are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DnsError::Transient(_))
    }
}

/// Capability the registration processor and liveness monitor use to keep
/// DNS in sync with the host store.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Idempotent upsert of an A record (IPv4) or AAAA record (IPv6).
    async fn ensure_record(
        &self,
        hostname: &str,
        zone: &str,
        ip: IpAddr,
        ttl: Duration,
    ) -> Result<UpsertOutcome, DnsError>;

    /// Remove a hostname's record from a zone.
    async fn delete_record(&self, hostname: &str, zone: &str) -> Result<DeleteOutcome, DnsError>;

    /// Whether `zone` is known to this provider.
    async fn zone_exists(&self, zone: &str) -> Result<bool, DnsError>;
}
