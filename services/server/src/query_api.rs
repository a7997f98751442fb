//! Read-only HTTP query surface (§10.5): exposes the host store's read path
//! and the statistics rollup over a small `axum` router. This is NOT the
//! "HTTP/REST front-end" the wire spec places out of scope -- it is the
//! minimal operational stand-in a production workspace always ships, so the
//! store and statistics are independently reachable and testable.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use prism_store::{DnsSyncState, Host, HostStatus, HostStore};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::stats::{HealthStatus, StatsSnapshot, Statistics};

#[derive(Clone)]
pub struct QueryApiState<S: HostStore> {
    pub store: Arc<Mutex<S>>,
    pub stats: Statistics,
}

#[derive(Debug, Serialize)]
struct HostView {
    hostname: String,
    current_ip: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    status: &'static str,
    dns_zone: Option<String>,
    dns_sync_state: &'static str,
    dns_last_error: Option<String>,
}

impl From<Host> for HostView {
    fn from(h: Host) -> Self {
        HostView {
            hostname: h.hostname,
            current_ip: h.current_ip,
            first_seen: h.first_seen,
            last_seen: h.last_seen,
            status: status_str(h.status),
            dns_zone: h.dns_zone,
            dns_sync_state: dns_state_str(h.dns_sync_state),
            dns_last_error: h.dns_last_error,
        }
    }
}

fn status_str(status: HostStatus) -> &'static str {
    match status {
        HostStatus::Online => "online",
        HostStatus::Offline => "offline",
    }
}

fn dns_state_str(state: DnsSyncState) -> &'static str {
    match state {
        DnsSyncState::Pending => "pending",
        DnsSyncState::Synced => "synced",
        DnsSyncState::Failed => "failed",
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Build the read-only router. `S` is generic so tests can exercise it
/// against an in-memory store without a real socket.
pub fn router<S>(state: QueryApiState<S>) -> Router
where
    S: HostStore + Send + 'static,
{
    Router::new()
        .route("/healthz", get(healthz::<S>))
        .route("/api/v1/hosts", get(list_hosts::<S>))
        .route("/api/v1/hosts/{hostname}", get(get_host::<S>))
        .route("/api/v1/stats", get(get_stats::<S>))
        .with_state(state)
}

async fn healthz<S: HostStore>(State(state): State<QueryApiState<S>>) -> impl IntoResponse {
    let health = state.stats.snapshot().health;
    let code = match health {
        HealthStatus::Healthy | HealthStatus::Warning => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(serde_json::json!({ "health": health })))
}

async fn list_hosts<S: HostStore>(State(state): State<QueryApiState<S>>) -> Response {
    let mut store = state.store.lock().await;
    match store.list_all() {
        Ok(hosts) => {
            let views: Vec<HostView> = hosts.into_iter().map(HostView::from).collect();
            Json(serde_json::json!({ "hosts": views })).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody { error: e.to_string() }),
        )
            .into_response(),
    }
}

async fn get_host<S: HostStore>(
    State(state): State<QueryApiState<S>>,
    Path(hostname): Path<String>,
) -> Response {
    let mut store = state.store.lock().await;
    match store.get(&hostname) {
        Ok(Some(host)) => Json(HostView::from(host)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody { error: format!("unknown host: {hostname}") }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody { error: e.to_string() }),
        )
            .into_response(),
    }
}

async fn get_stats<S: HostStore>(State(state): State<QueryApiState<S>>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use prism_store::SqliteHostStore;
    use tower::ServiceExt;

    async fn state_with_host() -> QueryApiState<SqliteHostStore> {
        let mut store = SqliteHostStore::open_in_memory().unwrap();
        store.create("host-a", "10.0.0.1", Some("example.com"), Utc::now()).unwrap();
        QueryApiState {
            store: Arc::new(Mutex::new(store)),
            stats: Statistics::new(),
        }
    }

    #[tokio::test]
    async fn healthz_returns_200_when_healthy() {
        let state = state_with_host().await;
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_hosts_includes_seeded_host() {
        let state = state_with_host().await;
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/api/v1/hosts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["hosts"][0]["hostname"], "host-a");
    }

    #[tokio::test]
    async fn get_host_404s_for_unknown_hostname() {
        let state = state_with_host().await;
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/api/v1/hosts/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_host_returns_seeded_host() {
        let state = state_with_host().await;
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/api/v1/hosts/host-a").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn stats_endpoint_returns_snapshot() {
        let state = state_with_host().await;
        state.stats.record_message_received();
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/api/v1/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["messages_received"], 1);
    }
}
