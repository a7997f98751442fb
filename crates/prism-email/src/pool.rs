//! Bounded pool of authenticated SMTP sessions (§4.11).

use std::time::{Duration, Instant};

use mail_send::SmtpClientBuilder;
use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmtpPoolConfig {
    pub max_size: usize,
    pub max_idle_time: Duration,
    pub acquire_timeout: Duration,
}

impl Default for SmtpPoolConfig {
    fn default() -> Self {
        SmtpPoolConfig {
            max_size: 5,
            max_idle_time: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpTransportConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub use_ssl: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("smtp connection pool is closed")]
    Closed,
    #[error("timed out waiting for an available connection")]
    PoolExhausted,
    #[error("failed to establish smtp session: {0}")]
    Connect(String),
}

struct PooledConnection {
    id: u64,
    session: mail_send::SmtpClient<tokio::net::TcpStream>,
    created_at: Instant,
    last_used: Instant,
    in_use: bool,
}

impl PooledConnection {
    fn is_healthy(&self, max_idle_time: Duration) -> bool {
        self.last_used.elapsed() <= max_idle_time
    }
}

struct Inner {
    connections: Vec<PooledConnection>,
    next_id: u64,
    closed: bool,
}

/// A bounded pool of authenticated SMTP sessions, acquired/released around
/// each send so that concurrent sends reuse live connections instead of
/// renegotiating TLS and auth on every message.
pub struct SmtpConnectionPool {
    config: SmtpPoolConfig,
    transport: SmtpTransportConfig,
    inner: Mutex<Inner>,
}

/// A handle borrowed from the pool; releases itself back on drop via
/// [`SmtpConnectionPool::release`] -- callers must call `release` explicitly
/// since async drop is not available, matching the source's
/// `async with get_connection()` context-manager shape.
///
/// Keyed by a stable connection id rather than a `Vec` position: `acquire`'s
/// `retain` call (and `evict_idle`/`close`) can shift or drop entries out
/// from under a position-based index while this handle is outstanding.
pub struct PooledHandle {
    id: u64,
}

impl SmtpConnectionPool {
    pub fn new(config: SmtpPoolConfig, transport: SmtpTransportConfig) -> Self {
        SmtpConnectionPool {
            config,
            transport,
            inner: Mutex::new(Inner {
                connections: Vec::new(),
                next_id: 0,
                closed: false,
            }),
        }
    }

    /// Number of connections currently held by the pool (in use or idle).
    pub async fn size(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Acquire a session, reusing an idle healthy one, opening a new one if
    /// there is room, or waiting up to `acquire_timeout` otherwise.
    pub async fn acquire(&self) -> Result<PooledHandle, PoolError> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return Err(PoolError::Closed);
                }

                if let Some(index) = inner
                    .connections
                    .iter()
                    .position(|c| !c.in_use && c.is_healthy(self.config.max_idle_time))
                {
                    inner.connections[index].in_use = true;
                    inner.connections[index].last_used = Instant::now();
                    let id = inner.connections[index].id;
                    return Ok(PooledHandle { id });
                }

                inner
                    .connections
                    .retain(|c| c.in_use || c.is_healthy(self.config.max_idle_time));

                if inner.connections.len() < self.config.max_size {
                    drop(inner);
                    let session = self.connect().await?;
                    let mut inner = self.inner.lock().await;
                    let now = Instant::now();
                    let id = inner.next_id;
                    inner.next_id += 1;
                    inner.connections.push(PooledConnection {
                        id,
                        session,
                        created_at: now,
                        last_used: now,
                        in_use: true,
                    });
                    return Ok(PooledHandle { id });
                }
            }

            if Instant::now() >= deadline {
                return Err(PoolError::PoolExhausted);
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Mark a handle's connection idle again.
    pub async fn release(&self, handle: PooledHandle) {
        let mut inner = self.inner.lock().await;
        if let Some(conn) = inner.connections.iter_mut().find(|c| c.id == handle.id) {
            conn.in_use = false;
            conn.last_used = Instant::now();
        }
    }

    /// Send a prepared message over the session backing `handle`.
    pub async fn send(
        &self,
        handle: &PooledHandle,
        message: mail_send::smtp::message::Message<'_>,
    ) -> Result<(), mail_send::Error> {
        let mut inner = self.inner.lock().await;
        let conn = inner
            .connections
            .iter_mut()
            .find(|c| c.id == handle.id)
            .expect("handle outlives its pooled connection");
        conn.session.send(message).await
    }

    async fn connect(&self) -> Result<mail_send::SmtpClient<tokio::net::TcpStream>, PoolError> {
        let mut builder = SmtpClientBuilder::new(self.transport.host.clone(), self.transport.port)
            .implicit_tls(self.transport.use_ssl);
        if let (Some(user), Some(pass)) = (&self.transport.username, &self.transport.password) {
            builder = builder.credentials((user.as_str(), pass.as_str()));
        }

        let result = if self.transport.use_tls || self.transport.use_ssl {
            builder.connect().await
        } else {
            builder.connect_plain().await
        };
        result.map_err(|e| PoolError::Connect(e.to_string()))
    }

    /// Quit every session and mark the pool permanently closed; subsequent
    /// `acquire` calls fail with [`PoolError::Closed`].
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.connections.clear();
    }

    /// Drop idle connections past `max_idle_time`. Called periodically by
    /// the owning provider; not required for correctness since `acquire`
    /// already evicts lazily, but keeps idle session counts visible sooner.
    pub async fn evict_idle(&self) {
        let mut inner = self.inner.lock().await;
        let max_idle = self.config.max_idle_time;
        inner.connections.retain(|c| c.in_use || c.is_healthy(max_idle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_size_is_five() {
        assert_eq!(SmtpPoolConfig::default().max_size, 5);
    }

    #[tokio::test]
    async fn acquire_on_closed_pool_fails() {
        let pool = SmtpConnectionPool::new(
            SmtpPoolConfig::default(),
            SmtpTransportConfig {
                host: "localhost".to_owned(),
                port: 2525,
                username: None,
                password: None,
                use_tls: false,
                use_ssl: false,
            },
        );
        pool.close().await;
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }
}
