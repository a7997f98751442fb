//! Per-connection lifecycle (§4.6): read loop, frame decode, validate,
//! dispatch to the registration processor, respond, cleanup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use prism_protocol::{encode, validate_register, FrameCodec, FrameError, ResponseMessage, ValidationError};
use prism_store::HostStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::registration::{RegistrationError, RegistrationProcessor};
use crate::stats::Statistics;

const READ_CHUNK_SIZE: usize = 8192;

/// Everything a connection handler needs that outlives the connection
/// itself, shared across every concurrently-running handler.
pub struct ConnectionContext<S: HostStore> {
    pub registration: Arc<RegistrationProcessor<S>>,
    pub stats: Statistics,
    pub max_message_size: usize,
    pub max_buffer_size: usize,
    pub connection_timeout: Duration,
}

/// Drives one accepted TCP connection to completion (§4.6).
///
/// `shutdown` is a broadcast of the server's graceful-shutdown signal: the
/// handler finishes whatever message it is mid-processing and then exits
/// instead of blocking on the next read, mirroring the session-loop idiom
/// used for the receiver's websocket sessions.
pub async fn handle_connection<S: HostStore>(
    mut socket: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext<S>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let started_at = Instant::now();
    let source_ip = peer.ip().to_string();
    ctx.stats.record_connection_opened(&source_ip);
    info!(%peer, "connection opened");

    let mut codec = FrameCodec::new(ctx.max_message_size, ctx.max_buffer_size);
    let mut messages_processed: u64 = 0;
    let mut read_buf = vec![0u8; READ_CHUNK_SIZE];

    'connection: loop {
        let read_result = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break 'connection;
                }
                continue 'connection;
            }
            result = tokio::time::timeout(ctx.connection_timeout, socket.read(&mut read_buf)) => result,
        };

        let n = match read_result {
            Err(_elapsed) => {
                warn!(%peer, "connection timed out");
                let resp = ResponseMessage::error("connection timed out");
                write_response(&mut socket, &resp, ctx.max_message_size, &ctx.stats).await;
                ctx.stats.record_error("timeout", "connection_timeout elapsed");
                break 'connection;
            }
            Ok(Err(e)) => {
                warn!(%peer, error = %e, "read error");
                break 'connection;
            }
            Ok(Ok(0)) => {
                debug!(%peer, "peer closed connection");
                break 'connection;
            }
            Ok(Ok(n)) => n,
        };

        let outcome = codec.decode(&read_buf[..n]);

        for value in outcome.messages {
            messages_processed += 1;
            ctx.stats.record_message_received();
            ctx.stats.record_message_type(message_type(&value));
            let message_started = Instant::now();
            let response = process_one(&ctx, &value, peer).await;
            ctx.stats.record_processing_time(message_started.elapsed());
            write_response(&mut socket, &response, ctx.max_message_size, &ctx.stats).await;
        }

        if let Some(err) = outcome.error {
            warn!(%peer, error = %err, "frame error, closing connection");
            let resp = ResponseMessage::error(frame_error_message(&err));
            write_response(&mut socket, &resp, ctx.max_message_size, &ctx.stats).await;
            ctx.stats.record_error("frame", err.to_string());
            break 'connection;
        }
    }

    codec.reset();
    ctx.stats.record_connection_closed();
    info!(
        %peer,
        duration_ms = started_at.elapsed().as_millis() as u64,
        messages_processed,
        "connection closed"
    );
}

/// Validate and dispatch one decoded frame, producing the response to write
/// back. Never propagates an error out -- every failure mode becomes a
/// `status = error` response so the connection can stay open (§4.6 step 5).
async fn process_one<S: HostStore>(
    ctx: &ConnectionContext<S>,
    value: &serde_json::Value,
    peer: SocketAddr,
) -> ResponseMessage {
    let validated = match validate_register(value) {
        Ok(v) => v,
        Err(err) => {
            warn!(%peer, error = %err, "validation failed");
            ctx.stats.record_error("validation", err.to_string());
            return ResponseMessage::error(sanitize_for_response(&err));
        }
    };

    if validated.is_reserved {
        warn!(%peer, hostname = %validated.hostname, "reserved hostname registered");
    }

    match ctx
        .registration
        .process(&validated.hostname, peer.ip(), validated.auth_token.as_deref())
        .await
    {
        Ok(outcome) => {
            debug!(%peer, hostname = %validated.hostname, outcome = outcome.as_str(), "registration processed");
            ResponseMessage::success(format!("registered: {}", outcome.as_str()))
        }
        Err(RegistrationError::AuthRejected) => {
            warn!(%peer, hostname = %validated.hostname, "auth token rejected");
            ctx.stats.record_error("auth", "token mismatch");
            ResponseMessage::error("authentication failed")
        }
        Err(RegistrationError::Store(e)) => {
            tracing::error!(%peer, hostname = %validated.hostname, error = %e, "store error");
            ctx.stats.record_error("store", e.to_string());
            ResponseMessage::error("internal error")
        }
    }
}

/// User-visible messages never leak internals (§7): validation detail is
/// logged, but the wire response gets a stable, sanitized category.
fn sanitize_for_response(err: &ValidationError) -> &'static str {
    match err {
        ValidationError::UnsupportedVersion(_) => "unsupported protocol version",
        ValidationError::InvalidType(_) => "invalid message type",
        ValidationError::InvalidHostname(_) => "invalid hostname",
        ValidationError::InvalidTimestamp(_) => "invalid timestamp",
        ValidationError::SecurityViolation(_) => "message rejected",
        ValidationError::Malformed(_) => "malformed message",
    }
}

fn frame_error_message(err: &FrameError) -> &'static str {
    match err {
        FrameError::FrameTooLarge { .. } => "frame exceeds maximum message size",
        FrameError::BufferOverflow { .. } => "receive buffer exceeded",
        FrameError::DecodeError(_) => "failed to decode frame",
    }
}

/// The wire `type` discriminant of a decoded message, for the per-type
/// breakdown in the statistics snapshot (§4.9).
fn message_type(value: &serde_json::Value) -> &str {
    value.get("type").and_then(serde_json::Value::as_str).unwrap_or("unknown")
}

async fn write_response(
    socket: &mut TcpStream,
    response: &ResponseMessage,
    max_message_size: usize,
    stats: &Statistics,
) {
    match encode(response, max_message_size) {
        Ok(bytes) => match socket.write_all(&bytes).await {
            Ok(()) => stats.record_message_sent(),
            Err(e) => warn!(error = %e, "failed to write response"),
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response");
        }
    }
}

/// Writes one pre-built error response and returns immediately, used by the
/// TCP server's admission-control path (§4.7) before a handler task even
/// starts.
pub async fn reject_at_capacity(mut socket: TcpStream, max_message_size: usize, stats: &Statistics) {
    let resp = ResponseMessage::error("server at capacity");
    write_response(&mut socket, &resp, max_message_size, stats).await;
}
