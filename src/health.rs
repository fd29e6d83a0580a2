use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Result};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthState {
    pub last_tick_ok: bool,
    pub last_tick_at: Option<i64>,
    pub tip_height: Option<u32>,
    pub swaps_tracked: u64,
    pub consecutive_failures: u32,
}

/// Shared health signal updated by the orchestrator after every polling
/// tick and served over HTTP for liveness checks.
#[derive(Clone)]
pub struct Health {
    state: Arc<RwLock<HealthState>>,
    /// A tick older than this renders the service degraded even if it
    /// succeeded.
    stale_after_secs: i64,
}

impl Health {
    pub fn new(stale_after_secs: i64) -> Self {
        Self {
            state: Arc::new(RwLock::new(HealthState::default())),
            stale_after_secs,
        }
    }

    pub fn record_tick_ok(&self, tip_height: u32, swaps_tracked: u64) {
        let mut state = self.state.write().expect("health lock poisoned");
        state.last_tick_ok = true;
        state.last_tick_at = Some(unix_now());
        state.tip_height = Some(tip_height);
        state.swaps_tracked = swaps_tracked;
        state.consecutive_failures = 0;
    }

    pub fn record_tick_failure(&self) {
        let mut state = self.state.write().expect("health lock poisoned");
        state.last_tick_ok = false;
        state.last_tick_at = Some(unix_now());
        state.consecutive_failures += 1;
    }

    pub fn snapshot(&self) -> HealthState {
        self.state.read().expect("health lock poisoned").clone()
    }

    pub fn is_healthy(&self) -> bool {
        let state = self.snapshot();
        state.last_tick_ok
            && state
                .last_tick_at
                .is_some_and(|at| unix_now() - at <= self.stale_after_secs)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn router(health: Health) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(health)
}

/// Serve the health endpoints until the process exits.
pub async fn serve(addr: SocketAddr, health: Health) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind health listener on {addr}"))?;
    tracing::info!(%addr, "health server listening");

    axum::serve(listener, router(health))
        .await
        .context("serve health endpoints")
}

async fn health_handler(State(health): State<Health>) -> impl IntoResponse {
    if health.is_healthy() {
        (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "service": "comit-swap-watch" })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "service": "comit-swap-watch" })),
        )
    }
}

async fn status_handler(State(health): State<Health>) -> impl IntoResponse {
    let state = health.snapshot();
    Json(json!({
        "service": "comit-swap-watch",
        "healthy": health.is_healthy(),
        "last_tick_ok": state.last_tick_ok,
        "last_tick_at": state.last_tick_at,
        "tip_height": state.tip_height,
        "swaps_tracked": state.swaps_tracked,
        "consecutive_failures": state.consecutive_failures,
    }))
}
