//! `prism-server`: the registration-server core (§2-§4 of the wire spec)
//! wired up as a binary -- TCP accept loop, connection handler, the
//! registration state machine, the liveness monitor, the statistics core,
//! and the read-only HTTP query surface.

pub mod connection;
pub mod liveness;
pub mod query_api;
pub mod registration;
pub mod stats;
pub mod tcp_server;

pub use connection::ConnectionContext;
pub use liveness::LivenessMonitor;
pub use registration::{RegistrationError, RegistrationOutcome, RegistrationProcessor};
pub use stats::Statistics;
pub use tcp_server::TcpServer;
