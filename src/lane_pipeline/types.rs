//! Lane pipeline types

use crate::access_resolver::{AuthorizationBasis, DenyReason};
use crate::models::Direction;
use crate::plate_normalizer::Rejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LanePhase {
    Scanning,
    Candidate,
    Recognizing,
    Deciding,
    Acting,
    Cooldown,
}

/// Why a candidate was dropped before a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropReason {
    RecognizerFailed,
    RecognizerTimeout,
}

/// What the session manager did for a granted passage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionAction {
    Opened { session_id: String },
    AlreadyOpen { session_id: String },
    Closed { session_id: String, duration_seconds: Option<i64> },
    NotFound,
    Failed { error_code: String },
}

/// What the barrier did for a granted passage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarrierAction {
    Opened,
    /// Barrier was already open for an earlier vehicle
    AlreadyOpen,
    Faulted,
}

/// Result of one candidate's trip through the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateOutcome {
    Dropped { reason: DropReason },
    Rejected { reason: Rejection },
    /// Same plate decided within the dwell window
    Debounced { plate: String },
    Granted {
        plate: String,
        basis: AuthorizationBasis,
        session: SessionAction,
        barrier: BarrierAction,
    },
    Denied { plate: String, reason: DenyReason },
}

impl CandidateOutcome {
    /// Authorized or denied (the outcomes that reach the decision log)
    pub fn is_decision(&self) -> bool {
        matches!(
            self,
            CandidateOutcome::Granted { .. } | CandidateOutcome::Denied { .. }
        )
    }

    pub fn plate(&self) -> Option<&str> {
        match self {
            CandidateOutcome::Debounced { plate }
            | CandidateOutcome::Granted { plate, .. }
            | CandidateOutcome::Denied { plate, .. } => Some(plate),
            _ => None,
        }
    }
}

/// Fault surfaced to the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneFault {
    pub lane: Direction,
    pub error_code: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl LaneFault {
    pub fn new(lane: Direction, error: &crate::Error) -> Self {
        Self {
            lane,
            error_code: error.code().to_string(),
            message: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// Snapshot published after every phase change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneStatus {
    pub lane: Direction,
    pub lot_id: String,
    pub phase: LanePhase,
    pub running: bool,
    pub frames_processed: u64,
    pub decisions: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<CandidateOutcome>,
}

impl LaneStatus {
    pub fn new(lane: Direction, lot_id: &str) -> Self {
        Self {
            lane,
            lot_id: lot_id.to_string(),
            phase: LanePhase::Scanning,
            running: false,
            frames_processed: 0,
            decisions: 0,
            last_frame_at: None,
            last_outcome: None,
        }
    }
}

/// Per-lane settings, read-only for the pipeline's lifetime
#[derive(Debug, Clone)]
pub struct LaneConfig {
    pub lot_id: String,
    pub sample_interval: Duration,
    /// Bound on each detector/recognizer call
    pub recognizer_timeout: Duration,
    /// Dwell window per plate
    pub cooldown: Duration,
    pub cooldown_capacity: usize,
    pub frame_backoff_base: Duration,
    pub frame_backoff_max: Duration,
}

impl LaneConfig {
    pub fn new(lot_id: impl Into<String>) -> Self {
        Self {
            lot_id: lot_id.into(),
            sample_interval: Duration::from_secs(2),
            recognizer_timeout: Duration::from_secs(3),
            cooldown: Duration::from_secs(10),
            cooldown_capacity: 1024,
            frame_backoff_base: Duration::from_millis(500),
            frame_backoff_max: Duration::from_secs(30),
        }
    }
}
