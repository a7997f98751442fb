//! Data model for the authoritative host store.

use chrono::{DateTime, Utc};

/// Liveness state last computed for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Online,
    Offline,
}

impl HostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HostStatus::Online => "online",
            HostStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(HostStatus::Online),
            "offline" => Some(HostStatus::Offline),
            _ => None,
        }
    }
}

/// Outcome of DNS propagation for a host's current IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsSyncState {
    Pending,
    Synced,
    Failed,
}

impl DnsSyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            DnsSyncState::Pending => "pending",
            DnsSyncState::Synced => "synced",
            DnsSyncState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DnsSyncState::Pending),
            "synced" => Some(DnsSyncState::Synced),
            "failed" => Some(DnsSyncState::Failed),
            _ => None,
        }
    }
}

/// One registered host, keyed by its sanitized hostname.
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub hostname: String,
    pub current_ip: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: HostStatus,
    pub dns_zone: Option<String>,
    pub dns_sync_state: DnsSyncState,
    pub dns_last_error: Option<String>,
}
