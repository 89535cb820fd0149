//! WebAPI - operational REST endpoints
//!
//! ## Responsibilities
//!
//! - Lane, barrier and health status
//! - Open sessions, occupancy and recent decisions
//! - Manual barrier close (no manual open)

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let lanes_running = state.supervisor.lanes_running().await;

    Json(HealthResponse {
        status: if lanes_running == 2 { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        store_backend: state.supervisor.store_backend().to_string(),
        lanes_running,
    })
}
