//! The TCP accept loop (§4.7): admission control, per-connection tasks,
//! and graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prism_store::HostStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::connection::{handle_connection, reject_at_capacity, ConnectionContext};
use crate::stats::Statistics;

/// Runs the accept loop until `shutdown` fires, then waits up to
/// `graceful_shutdown_timeout` for in-flight connections to finish on their
/// own before returning.
pub struct TcpServer<S: HostStore> {
    listener: TcpListener,
    ctx: Arc<ConnectionContext<S>>,
    max_connections: usize,
    graceful_shutdown_timeout: Duration,
    running: Arc<AtomicBool>,
}

impl<S: HostStore + Send + 'static> TcpServer<S> {
    pub async fn bind(
        host: &str,
        port: u16,
        ctx: Arc<ConnectionContext<S>>,
        max_connections: usize,
        graceful_shutdown_timeout: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        info!(addr = %listener.local_addr()?, "tcp server bound");
        Ok(TcpServer {
            listener,
            ctx,
            max_connections,
            graceful_shutdown_timeout,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Accept connections until `shutdown_rx` carries `true`. Admission
    /// control rejects a connection immediately, without holding the accept
    /// loop, if `active >= max_connections` (§4.7).
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            if self.ctx.stats.active_connections() as usize >= self.max_connections {
                                warn!(%peer, "rejecting connection: server at capacity");
                                let stats = self.ctx.stats.clone();
                                let max_message_size = self.ctx.max_message_size;
                                tokio::spawn(async move {
                                    reject_at_capacity(socket, max_message_size, &stats).await;
                                });
                                continue;
                            }
                            let ctx = Arc::clone(&self.ctx);
                            let conn_shutdown_rx = conn_shutdown_rx.clone();
                            handles.push(tokio::spawn(async move {
                                handle_connection(socket, peer, ctx, conn_shutdown_rx).await;
                            }));
                        }
                        Err(e) => {
                            warn!(error = %e, "accept error");
                        }
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("tcp server stopped accepting, starting graceful drain");
        let _ = conn_shutdown_tx.send(true);

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.graceful_shutdown_timeout, drain).await.is_err() {
            warn!("graceful shutdown timeout elapsed, remaining connections force-closed on drop");
        }
        info!("tcp server shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::RegistrationProcessor;
    use prism_config::Config;
    use prism_dns::DisabledDnsProvider;
    use prism_protocol::{encode, FrameCodec, RegisterMessage, ResponseMessage, PROTOCOL_VERSION};
    use prism_store::SqliteHostStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::Mutex;

    async fn ctx_with_max_connections() -> Arc<ConnectionContext<SqliteHostStore>> {
        let store = Arc::new(Mutex::new(SqliteHostStore::open_in_memory().unwrap()));
        let config = Config::defaults();
        let stats = Statistics::new();
        let registration = Arc::new(RegistrationProcessor::new(
            store,
            Arc::new(DisabledDnsProvider),
            stats.clone(),
            &config,
        ));
        Arc::new(ConnectionContext {
            registration,
            stats,
            max_message_size: config.protocol.max_message_size,
            max_buffer_size: config.protocol.max_buffer_size,
            connection_timeout: Duration::from_secs(5),
        })
    }

    fn register_frame(hostname: &str) -> Vec<u8> {
        let msg = RegisterMessage {
            version: PROTOCOL_VERSION.to_owned(),
            message_type: "registration".to_owned(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            hostname: hostname.to_owned(),
            auth_token: None,
        };
        encode(&msg, 65536).unwrap()
    }

    #[tokio::test]
    async fn accepts_connection_and_processes_registration() {
        let ctx = ctx_with_max_connections().await;
        let server = TcpServer::bind("127.0.0.1", 0, ctx, 1000, Duration::from_secs(1))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(server.run(shutdown_rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&register_frame("host-a")).await.unwrap();
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        let mut codec = FrameCodec::with_defaults();
        let resp: ResponseMessage =
            serde_json::from_value(codec.decode(&buf[..n]).messages[0].clone()).unwrap();
        assert_eq!(resp.status, prism_protocol::ResponseStatus::Success);

        let _ = shutdown_tx.send(true);
        let _ = join.await;
    }

    #[tokio::test]
    async fn rejects_connection_at_capacity() {
        let ctx = ctx_with_max_connections().await;
        ctx.stats.record_connection_opened("10.0.0.1");
        let server = TcpServer::bind("127.0.0.1", 0, Arc::clone(&ctx), 1, Duration::from_secs(1))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(server.run(shutdown_rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        let mut codec = FrameCodec::with_defaults();
        let resp: ResponseMessage =
            serde_json::from_value(codec.decode(&buf[..n]).messages[0].clone()).unwrap();
        assert_eq!(resp.status, prism_protocol::ResponseStatus::Error);
        assert!(resp.message.contains("capacity"));

        let _ = shutdown_tx.send(true);
        let _ = join.await;
    }

    #[tokio::test]
    async fn stop_flips_is_running_to_false_and_rejects_new_accepts() {
        let ctx = ctx_with_max_connections().await;
        let server = TcpServer::bind("127.0.0.1", 0, ctx, 1000, Duration::from_millis(50))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let running_flag = Arc::clone(&server.running);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(server.run(shutdown_rx));

        let _ = shutdown_tx.send(true);
        join.await.unwrap();

        assert!(!running_flag.load(Ordering::SeqCst));
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
