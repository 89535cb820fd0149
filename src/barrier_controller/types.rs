//! Barrier state and timing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Barrier phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarrierPhase {
    Closed,
    Opening,
    Open,
    Closing,
}

impl BarrierPhase {
    /// Phases in which the green indicator is lit
    pub fn shows_go(&self) -> bool {
        matches!(self, BarrierPhase::Opening | BarrierPhase::Open)
    }
}

/// Snapshot published by the controller after every transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierState {
    pub phase: BarrierPhase,
    pub opened_at: Option<DateTime<Utc>>,
    /// Completed open actuations since start
    pub open_cycles: u64,
    /// Completed closes since start
    pub close_cycles: u64,
    /// Open actuations issued since the barrier was last CLOSED
    pub actuations_since_closed: u32,
    /// Last hardware fault, cleared by the next successful open
    pub hardware_fault: Option<String>,
}

impl Default for BarrierState {
    fn default() -> Self {
        Self {
            phase: BarrierPhase::Closed,
            opened_at: None,
            open_cycles: 0,
            close_cycles: 0,
            actuations_since_closed: 0,
            hardware_fault: None,
        }
    }
}

/// Fixed timings, read-only for the controller's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierTiming {
    /// Actuator travel time (OPENING -> OPEN)
    pub settle: Duration,
    /// Open-hold before auto-close
    pub hold: Duration,
    pub confirm_tone: Duration,
    pub deny_tone: Duration,
}

impl Default for BarrierTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            hold: Duration::from_secs(15),
            confirm_tone: Duration::from_millis(200),
            deny_tone: Duration::from_millis(1000),
        }
    }
}

/// Reply to an open command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpenOutcome {
    /// Actuation issued and confirmed
    Opened,
    /// Barrier was already OPENING/OPEN/CLOSING
    Ignored,
}
