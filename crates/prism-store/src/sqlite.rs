//! SQLite-backed `HostStore`.
//!
//! # SQLite durability settings
//! Applied at open: WAL, synchronous=FULL, foreign_keys=ON.
//! `PRAGMA integrity_check` runs at open; returns `Err` if it fails.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{DnsSyncState, Host, HostStatus};
use crate::store::{HostStore, StoreError};

/// The reference `HostStore` implementation, backed by a single SQLite file.
pub struct SqliteHostStore {
    conn: Connection,
}

impl SqliteHostStore {
    /// Open (or create) the store at `path`.
    ///
    /// Applies PRAGMAs, runs `PRAGMA integrity_check`, and creates the schema
    /// if needed. Returns `Err` if the integrity check fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store. Used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(SqliteHostStore { conn })
    }
}

impl HostStore for SqliteHostStore {
    fn get(&mut self, hostname: &str) -> Result<Option<Host>, StoreError> {
        self.conn
            .query_row(
                "SELECT hostname, current_ip, first_seen, last_seen, status,
                        dns_zone, dns_sync_state, dns_last_error
                 FROM hosts WHERE hostname = ?1",
                params![hostname],
                map_host,
            )
            .optional()
            .map_err(StoreError::from)
    }

    fn create(
        &mut self,
        hostname: &str,
        ip: &str,
        zone: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        if self.get(hostname)?.is_some() {
            return Err(StoreError::AlreadyExists(hostname.to_owned()));
        }

        let now_str = now.to_rfc3339();
        self.conn.execute(
            "INSERT INTO hosts
                (hostname, current_ip, first_seen, last_seen, status,
                 dns_zone, dns_sync_state, dns_last_error)
             VALUES (?1, ?2, ?3, ?3, 'online', ?4, 'pending', NULL)",
            params![hostname, ip, now_str, zone],
        )?;

        Ok(Host {
            hostname: hostname.to_owned(),
            current_ip: ip.to_owned(),
            first_seen: now,
            last_seen: now,
            status: HostStatus::Online,
            dns_zone: zone.map(str::to_owned),
            dns_sync_state: DnsSyncState::Pending,
            dns_last_error: None,
        })
    }

    fn update_ip(
        &mut self,
        hostname: &str,
        new_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let affected = self.conn.execute(
            "UPDATE hosts SET current_ip = ?2, last_seen = ?3, status = 'online'
             WHERE hostname = ?1",
            params![hostname, new_ip, now.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    fn touch(&mut self, hostname: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let affected = self.conn.execute(
            "UPDATE hosts SET last_seen = ?2, status = 'online' WHERE hostname = ?1",
            params![hostname, now.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    fn mark_offline(&mut self, hostname: &str) -> Result<bool, StoreError> {
        let affected = self.conn.execute(
            "UPDATE hosts SET status = 'offline' WHERE hostname = ?1",
            params![hostname],
        )?;
        Ok(affected > 0)
    }

    fn list_stale(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Host>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT hostname, current_ip, first_seen, last_seen, status,
                    dns_zone, dns_sync_state, dns_last_error
             FROM hosts WHERE status = 'online' AND last_seen <= ?1",
        )?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339()], map_host)?;
        let mut hosts = Vec::new();
        for r in rows {
            hosts.push(r?);
        }
        Ok(hosts)
    }

    fn set_dns_state(
        &mut self,
        hostname: &str,
        state: DnsSyncState,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let affected = self.conn.execute(
            "UPDATE hosts SET dns_sync_state = ?2, dns_last_error = ?3 WHERE hostname = ?1",
            params![hostname, state.as_str(), error],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(hostname.to_owned()));
        }
        Ok(())
    }

    fn list_all(&mut self) -> Result<Vec<Host>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT hostname, current_ip, first_seen, last_seen, status,
                    dns_zone, dns_sync_state, dns_last_error
             FROM hosts",
        )?;
        let rows = stmt.query_map([], map_host)?;
        let mut hosts = Vec::new();
        for r in rows {
            hosts.push(r?);
        }
        Ok(hosts)
    }

    fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM hosts WHERE last_seen < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), StoreError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(StoreError::IntegrityCheckFailed(result));
    }
    Ok(())
}

fn map_host(row: &rusqlite::Row<'_>) -> Result<Host, rusqlite::Error> {
    let first_seen: String = row.get(2)?;
    let last_seen: String = row.get(3)?;
    let status: String = row.get(4)?;
    let dns_sync_state: String = row.get(6)?;

    Ok(Host {
        hostname: row.get(0)?,
        current_ip: row.get(1)?,
        first_seen: parse_rfc3339(&first_seen)?,
        last_seen: parse_rfc3339(&last_seen)?,
        status: HostStatus::parse(&status).unwrap_or(HostStatus::Offline),
        dns_zone: row.get(5)?,
        dns_sync_state: DnsSyncState::parse(&dns_sync_state).unwrap_or(DnsSyncState::Pending),
        dns_last_error: row.get(7)?,
    })
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> SqliteHostStore {
        SqliteHostStore::open_in_memory().expect("opens")
    }

    #[test]
    fn create_then_get_round_trips() {
        let mut s = store();
        let now = Utc::now();
        let host = s.create("host-a", "10.0.0.1", None, now).unwrap();
        assert_eq!(host.current_ip, "10.0.0.1");
        assert_eq!(host.status, HostStatus::Online);
        assert_eq!(host.dns_sync_state, DnsSyncState::Pending);

        let fetched = s.get("host-a").unwrap().unwrap();
        assert_eq!(fetched, host);
    }

    #[test]
    fn create_twice_is_already_exists() {
        let mut s = store();
        let now = Utc::now();
        s.create("host-a", "10.0.0.1", None, now).unwrap();
        let result = s.create("host-a", "10.0.0.2", None, now);
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn update_ip_bumps_last_seen_and_status() {
        let mut s = store();
        let t0 = Utc::now();
        s.create("host-a", "10.0.0.1", None, t0).unwrap();

        let t1 = t0 + Duration::seconds(30);
        assert!(s.update_ip("host-a", "10.0.0.2", t1).unwrap());

        let host = s.get("host-a").unwrap().unwrap();
        assert_eq!(host.current_ip, "10.0.0.2");
        assert_eq!(host.last_seen, t1);
        assert_eq!(host.status, HostStatus::Online);
    }

    #[test]
    fn update_ip_on_unknown_host_returns_false() {
        let mut s = store();
        assert!(!s.update_ip("ghost", "10.0.0.1", Utc::now()).unwrap());
    }

    #[test]
    fn touch_bumps_last_seen_without_changing_ip() {
        let mut s = store();
        let t0 = Utc::now();
        s.create("host-a", "10.0.0.1", None, t0).unwrap();

        let t1 = t0 + Duration::seconds(30);
        assert!(s.touch("host-a", t1).unwrap());

        let host = s.get("host-a").unwrap().unwrap();
        assert_eq!(host.current_ip, "10.0.0.1");
        assert_eq!(host.last_seen, t1);
    }

    #[test]
    fn mark_offline_and_list_stale() {
        let mut s = store();
        let t0 = Utc::now() - Duration::hours(1);
        s.create("host-a", "10.0.0.1", None, t0).unwrap();

        let cutoff = Utc::now();
        let stale = s.list_stale(cutoff).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].hostname, "host-a");

        assert!(s.mark_offline("host-a").unwrap());
        let stale_after = s.list_stale(cutoff).unwrap();
        assert!(stale_after.is_empty());
    }

    #[test]
    fn mark_offline_on_unknown_host_returns_false() {
        let mut s = store();
        assert!(!s.mark_offline("ghost").unwrap());
    }

    #[test]
    fn set_dns_state_on_unknown_host_is_not_found() {
        let mut s = store();
        let result = s.set_dns_state("ghost", DnsSyncState::Failed, Some("boom"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn prune_older_than_deletes_only_stale_rows() {
        let mut s = store();
        let old = Utc::now() - Duration::days(2);
        let recent = Utc::now();
        s.create("old-host", "10.0.0.1", None, old).unwrap();
        s.create("new-host", "10.0.0.2", None, recent).unwrap();

        let deleted = s.prune_older_than(Utc::now() - Duration::days(1)).unwrap();
        assert_eq!(deleted, 1);
        assert!(s.get("old-host").unwrap().is_none());
        assert!(s.get("new-host").unwrap().is_some());
    }

    #[test]
    fn list_all_returns_every_host() {
        let mut s = store();
        let now = Utc::now();
        s.create("a", "10.0.0.1", None, now).unwrap();
        s.create("b", "10.0.0.2", None, now).unwrap();
        assert_eq!(s.list_all().unwrap().len(), 2);
    }
}
