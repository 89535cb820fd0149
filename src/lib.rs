//! Gatekeeper - ANPR lane trigger and access control
//!
//! Two-lane vehicle checkpoint: cameras feed plate candidates through a
//! recognizer, the plate is checked against the access store, and the
//! lane's barrier opens for authorized vehicles.
//!
//! ## Architecture
//!
//! 1. LanePipeline - per-lane sample, detect, recognize, decide loop
//! 2. PlateNormalizer - canonical plate text and regional grammar
//! 3. AuthorizationResolver - fail-closed access decision
//! 4. SessionManager - idempotent entry/exit session writes
//! 5. BarrierController - per-lane actuation state machine
//! 6. OutputBoard - GPIO ownership and confirmed writes
//! 7. SystemSupervisor - lane lifecycle, fault collection, shutdown
//! 8. WebAPI - health and operator endpoints
//!
//! ## Design Principles
//!
//! - A lane never opens its barrier without an authorization decision
//! - Every failure path ends with the barrier closed
//! - Lanes share no mutable state besides the stores

pub mod access_resolver;
pub mod access_store;
pub mod anpr_client;
pub mod barrier_controller;
pub mod decision_log;
pub mod error;
pub mod frame_source;
pub mod lane_pipeline;
pub mod models;
pub mod output_board;
pub mod plate_normalizer;
pub mod sensor_status_tracker;
pub mod session_manager;
pub mod state;
pub mod supervisor;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
