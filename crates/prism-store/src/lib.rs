//! Authoritative `hostname -> host record` store.

pub mod model;
pub mod sqlite;
pub mod store;

pub use model::{DnsSyncState, Host, HostStatus};
pub use sqlite::SqliteHostStore;
pub use store::{HostStore, StoreError};
