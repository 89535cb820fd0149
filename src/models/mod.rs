//! Shared data models
//!
//! Ephemeral per-tick types (frames, candidates, readings) and the lane
//! identity shared by every component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of travel through a lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Entry,
    Exit,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Entry, Direction::Exit];

    /// Lower-case key used in logical line ids and config keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Entry => "entry",
            Direction::Exit => "exit",
        }
    }

    /// Value persisted in the session store
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Direction::Entry => "ENTRY",
            Direction::Exit => "EXIT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "entry" => Ok(Direction::Entry),
            "exit" => Ok(Direction::Exit),
            other => Err(crate::Error::Validation(format!(
                "unknown lane direction: {}",
                other
            ))),
        }
    }
}

/// Axis-aligned region in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One sampled camera image
#[derive(Debug, Clone)]
pub struct Frame {
    pub captured_at: DateTime<Utc>,
    /// Encoded image bytes (JPEG from the snapshot source)
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            captured_at: Utc::now(),
            data,
        }
    }
}

/// Region suspected to contain a plate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionCandidate {
    pub frame_timestamp: DateTime<Utc>,
    pub bbox: BoundingBox,
    pub detector_confidence: f32,
}

/// Raw recognizer output for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateReading {
    pub raw_text: String,
    pub recognizer_confidence: f32,
    pub candidate: DetectionCandidate,
}

/// Normalized, grammar-checked plate identifier
///
/// Two readings with the same `normalized_text` are the same physical plate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalPlate {
    pub normalized_text: String,
    pub format_valid: bool,
}

impl CanonicalPlate {
    pub fn as_str(&self) -> &str {
        &self.normalized_text
    }
}

impl fmt::Display for CanonicalPlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized_text)
    }
}

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub store_backend: String,
    pub lanes_running: usize,
}
