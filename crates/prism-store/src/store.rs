//! The `HostStore` port: every operation the registration processor and
//! liveness monitor need against the authoritative host table.

use chrono::{DateTime, Utc};

use crate::model::{DnsSyncState, Host};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("host not found: {0}")]
    NotFound(String),
    #[error("hostname already registered: {0}")]
    AlreadyExists(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// The authoritative `hostname -> host record` store.
///
/// Implementations are not required to be internally synchronized; callers
/// share a single instance behind a lock (see `services/server`). Branching
/// between `create`/`update_ip`/`touch` on a registration is the registration
/// processor's job (§4.5), not the store's.
pub trait HostStore {
    /// Fetch a host by its sanitized hostname.
    fn get(&mut self, hostname: &str) -> Result<Option<Host>, StoreError>;

    /// Create a new host record. Fails with `AlreadyExists` if `hostname` is
    /// already known.
    fn create(
        &mut self,
        hostname: &str,
        ip: &str,
        zone: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError>;

    /// Set `current_ip` and bump `last_seen`/`status = online`. Returns
    /// `false` if `hostname` is unknown.
    fn update_ip(&mut self, hostname: &str, new_ip: &str, now: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Bump `last_seen`/`status = online` without changing `current_ip`.
    /// Returns `false` if `hostname` is unknown.
    fn touch(&mut self, hostname: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Mark a host offline. Returns `false` if `hostname` is unknown.
    fn mark_offline(&mut self, hostname: &str) -> Result<bool, StoreError>;

    /// Hosts currently `online` whose `last_seen` is at or before `cutoff`.
    ///
    /// Used by the liveness monitor sweep (§4.8) to find hosts that have
    /// missed their heartbeat window.
    fn list_stale(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Host>, StoreError>;

    /// Record the outcome of a DNS propagation attempt for a host.
    fn set_dns_state(
        &mut self,
        hostname: &str,
        state: DnsSyncState,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// All known hosts, in no particular order.
    fn list_all(&mut self) -> Result<Vec<Host>, StoreError>;

    /// Delete hosts whose `last_seen` is strictly before `cutoff`.
    ///
    /// Returns the number of rows deleted.
    fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}
