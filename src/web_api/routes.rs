//! API Routes

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::models::{ApiResponse, Direction};
use crate::state::AppState;

/// Default number of decisions returned
const DEFAULT_DECISION_LIMIT: usize = 50;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(super::health_check))
        // Lanes
        .route("/api/lanes", get(list_lanes))
        .route("/api/lanes/:direction/close", post(close_barrier))
        // Sessions
        .route("/api/sessions/open", get(list_open_sessions))
        .route("/api/stats", get(occupancy_stats))
        // Decisions
        .route("/api/decisions", get(list_decisions))
        .with_state(state)
}

#[derive(Deserialize)]
struct LotQuery {
    lot_id: Option<String>,
}

impl LotQuery {
    /// Entry lane's lot when unspecified
    fn lot_id(self, state: &AppState) -> String {
        self.lot_id
            .unwrap_or_else(|| state.config.lot_id(Direction::Entry).to_string())
    }
}

#[derive(Deserialize)]
struct DecisionQuery {
    limit: Option<usize>,
    lane: Option<String>,
}

async fn list_lanes(State(state): State<AppState>) -> Json<ApiResponse<Vec<crate::supervisor::LaneSnapshot>>> {
    Json(ApiResponse::success(state.supervisor.lane_snapshots().await))
}

async fn close_barrier(
    State(state): State<AppState>,
    Path(direction): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>> {
    let lane: Direction = direction.parse()?;
    state.supervisor.close_barrier(lane).await?;

    let phase = state
        .supervisor
        .barrier(lane)
        .await
        .map(|b| b.state().phase);
    Ok(Json(ApiResponse::success(json!({
        "lane": lane,
        "phase": phase,
    }))))
}

async fn list_open_sessions(
    State(state): State<AppState>,
    Query(query): Query<LotQuery>,
) -> Result<Json<ApiResponse<Vec<crate::access_store::Session>>>> {
    let lot_id = query.lot_id(&state);
    let sessions = state.supervisor.sessions().open_sessions(&lot_id).await?;
    Ok(Json(ApiResponse::success(sessions)))
}

async fn occupancy_stats(
    State(state): State<AppState>,
    Query(query): Query<LotQuery>,
) -> Result<Json<ApiResponse<crate::access_store::OccupancyStats>>> {
    let lot_id = query.lot_id(&state);
    let stats = state
        .supervisor
        .sessions()
        .occupancy(&lot_id, start_of_day(Utc::now()))
        .await?;
    Ok(Json(ApiResponse::success(stats)))
}

async fn list_decisions(
    State(state): State<AppState>,
    Query(query): Query<DecisionQuery>,
) -> Result<Json<ApiResponse<Vec<crate::decision_log::DecisionRecord>>>> {
    let lane = query.lane.map(|l| l.parse::<Direction>()).transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_DECISION_LIMIT);
    let records = state.supervisor.decisions().latest(limit, lane).await;
    Ok(Json(ApiResponse::success(records)))
}

/// Midnight UTC of the given day
fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or(now)
}
