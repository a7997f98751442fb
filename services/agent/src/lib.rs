//! The heartbeat agent (§4.13): a standalone client process that, on a
//! fixed interval, opens a fresh connection to a `prism-server` and sends a
//! `REGISTER` frame for this host.

use std::net::ToSocketAddrs;
use std::time::Duration;

use prism_protocol::{encode, FrameCodec, RegisterMessage, ResponseMessage, PROTOCOL_VERSION};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{info, warn};

const READ_BUF_SIZE: usize = 4096;
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Configuration for one running agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// `host:port` of the server to register against.
    pub server_addr: String,
    /// Overrides OS hostname detection when set.
    pub hostname_override: Option<String>,
    pub interval: Duration,
    pub auth_token: Option<String>,
}

/// Runs the periodic heartbeat loop until stopped.
///
/// `stop` mirrors the `watch`-channel shutdown idiom used throughout this
/// workspace: setting it to `true` cancels any pending sleep before the next
/// tick fires, so `run` always returns promptly.
pub struct HeartbeatAgent {
    config: AgentConfig,
}

impl HeartbeatAgent {
    pub fn new(config: AgentConfig) -> Self {
        HeartbeatAgent { config }
    }

    /// Runs ticks on `config.interval` until `stop` carries `true`.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let hostname = resolve_hostname(self.config.hostname_override.as_deref());
        info!(hostname = %hostname, server = %self.config.server_addr, "heartbeat agent starting");

        loop {
            self.tick(&hostname).await;

            tokio::select! {
                biased;
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!("heartbeat agent stopped");
    }

    /// One send attempt: connect (with bounded reconnect backoff), write the
    /// frame, read the response best-effort, close. Every failure is logged
    /// and swallowed -- the next tick proceeds regardless (§4.13).
    async fn tick(&self, hostname: &str) {
        let stream = match connect_with_backoff(&self.config.server_addr).await {
            Some(stream) => stream,
            None => {
                warn!(server = %self.config.server_addr, "giving up on this tick, will retry next interval");
                return;
            }
        };

        if let Err(e) = send_registration(stream, hostname, self.config.auth_token.as_deref()).await {
            warn!(error = %e, "heartbeat send failed");
        }
    }
}

/// Attempts to connect with exponential backoff (1, 2, 4, ... capped at 60s).
/// Gives up after a bounded number of attempts and returns `None`.
async fn connect_with_backoff(server_addr: &str) -> Option<TcpStream> {
    const MAX_ATTEMPTS: u32 = 6;

    let mut delay = Duration::from_secs(1);
    for attempt in 1..=MAX_ATTEMPTS {
        match TcpStream::connect(server_addr).await {
            Ok(stream) => return Some(stream),
            Err(e) => {
                warn!(server = %server_addr, attempt, error = %e, "connect failed");
                if attempt == MAX_ATTEMPTS {
                    break;
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RECONNECT_BACKOFF_CAP);
            }
        }
    }
    None
}

async fn send_registration(
    mut stream: TcpStream,
    hostname: &str,
    auth_token: Option<&str>,
) -> std::io::Result<()> {
    let msg = RegisterMessage {
        version: PROTOCOL_VERSION.to_owned(),
        message_type: "registration".to_owned(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        hostname: hostname.to_owned(),
        auth_token: auth_token.map(str::to_owned),
    };

    let frame = encode(&msg, prism_protocol::codec::DEFAULT_MAX_MESSAGE_SIZE)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    stream.write_all(&frame).await?;

    // Best-effort: read whatever response arrives, but a closed/slow peer
    // must never hang the tick.
    let mut buf = vec![0u8; READ_BUF_SIZE];
    match tokio::time::timeout(Duration::from_secs(10), stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            let mut codec = FrameCodec::with_defaults();
            let outcome = codec.decode(&buf[..n]);
            if let Some(value) = outcome.messages.first() {
                if let Ok(resp) = serde_json::from_value::<ResponseMessage>(value.clone()) {
                    info!(status = ?resp.status, message = %resp.message, "server response");
                }
            }
        }
        Ok(Ok(_)) => warn!("server closed connection before responding"),
        Ok(Err(e)) => warn!(error = %e, "error reading response"),
        Err(_) => warn!("timed out waiting for response"),
    }

    Ok(())
}

/// OS hostname lookup, falling back to a generated, RFC-1123-safe name
/// (§4.13) when the OS call fails or returns non-UTF-8.
pub fn resolve_hostname(override_value: Option<&str>) -> String {
    if let Some(value) = override_value {
        return value.to_owned();
    }

    match hostname::get() {
        Ok(os_name) => match os_name.into_string() {
            Ok(name) if !name.is_empty() => sanitize_rfc1123(&name),
            _ => fallback_hostname(),
        },
        Err(_) => fallback_hostname(),
    }
}

fn fallback_hostname() -> String {
    let ts = chrono::Utc::now().timestamp();
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("prism-client-{ts}-{suffix}")
}

/// Lowercases and strips characters outside `[a-z0-9.-]`, matching the
/// hostname shape this protocol validates on the server side.
fn sanitize_rfc1123(name: &str) -> String {
    let lower = name.to_lowercase();
    let cleaned: String = lower
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect();
    cleaned.trim_matches(|c| c == '.' || c == '-').to_owned()
}

/// Best-effort validation that `server_addr` resolves, used by the CLI to
/// fail fast on an obviously bad `--server` value rather than retrying
/// forever against an unresolvable name.
pub fn validate_server_addr(server_addr: &str) -> std::io::Result<()> {
    server_addr.to_socket_addrs().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_takes_precedence_over_os_hostname() {
        assert_eq!(resolve_hostname(Some("custom-host")), "custom-host");
    }

    #[test]
    fn sanitize_rfc1123_lowercases_and_strips_invalid_chars() {
        assert_eq!(sanitize_rfc1123("My_Host!.example.COM"), "my-host-.example.com");
    }

    #[test]
    fn fallback_hostname_has_expected_prefix() {
        let name = fallback_hostname();
        assert!(name.starts_with("prism-client-"));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_against_closed_port_does_not_panic() {
        let agent = HeartbeatAgent::new(AgentConfig {
            server_addr: "127.0.0.1:1".to_owned(),
            hostname_override: Some("host-a".to_owned()),
            interval: Duration::from_millis(10),
            auth_token: None,
        });
        agent.tick("host-a").await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_promptly_when_stop_flag_flips() {
        let agent = HeartbeatAgent::new(AgentConfig {
            server_addr: "127.0.0.1:1".to_owned(),
            hostname_override: Some("host-a".to_owned()),
            interval: Duration::from_secs(3600),
            auth_token: None,
        });
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(agent.run(rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = tx.send(true);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run should return promptly after stop")
            .unwrap();
    }

    #[test]
    fn validate_server_addr_rejects_garbage() {
        assert!(validate_server_addr("not a valid addr").is_err());
    }
}
