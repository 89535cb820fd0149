//! Shared fakes for lane and supervisor scenarios
//!
//! Frames carry the plate text as their payload: the detector reports one
//! candidate for any non-empty frame and the recognizer reads the text back.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeeper::access_store::{
    AuthorizationRecord, AuthorizationStore, InsertOutcome, MemoryAccessStore, NewSession,
    OccupancyStats, PlateBlock, Session, SessionStore,
};
use gatekeeper::lane_pipeline::{FrameSource, PlateDetector, TextRecognizer};
use gatekeeper::models::{BoundingBox, DetectionCandidate, Frame, PlateReading};
use gatekeeper::plate_normalizer::{PlateGrammar, PlateNormalizer};
use gatekeeper::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub const LOT: &str = "1";
pub const PLATE: &str = "KA01AB1234";

/// Default board wiring
pub const ENTRY_BARRIER_PIN: u32 = 18;
pub const EXIT_BARRIER_PIN: u32 = 19;
pub const ENTRY_BUZZER_PIN: u32 = 22;
pub const ENTRY_STOP_PIN: u32 = 23;

pub fn plate_frame(text: &str) -> Frame {
    Frame::new(text.as_bytes().to_vec())
}

pub fn empty_frame() -> Frame {
    Frame::new(Vec::new())
}

/// Plays a fixed script, then waits forever
pub struct ScriptedSource {
    name: &'static str,
    frames: VecDeque<Result<Frame>>,
}

impl ScriptedSource {
    pub fn new(name: &'static str, frames: Vec<Result<Frame>>) -> Self {
        Self {
            name,
            frames: frames.into(),
        }
    }

    pub fn plates(name: &'static str, texts: &[&str]) -> Self {
        Self::new(name, texts.iter().map(|t| Ok(plate_frame(t))).collect())
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<Frame> {
        match self.frames.pop_front() {
            Some(frame) => frame,
            None => std::future::pending().await,
        }
    }

    fn describe(&self) -> String {
        format!("script://{}", self.name)
    }
}

/// Always down
pub struct DeadSource;

#[async_trait]
impl FrameSource for DeadSource {
    async fn next_frame(&mut self) -> Result<Frame> {
        Err(Error::SensorUnavailable("camera unplugged".into()))
    }

    fn describe(&self) -> String {
        "dead://camera".into()
    }
}

pub struct PayloadDetector;

#[async_trait]
impl PlateDetector for PayloadDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectionCandidate>> {
        if frame.data.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![DetectionCandidate {
            frame_timestamp: frame.captured_at,
            bbox: BoundingBox {
                x: 120,
                y: 300,
                width: 190,
                height: 50,
            },
            detector_confidence: 0.9,
        }])
    }
}

pub struct PayloadRecognizer {
    pub confidence: f32,
}

impl Default for PayloadRecognizer {
    fn default() -> Self {
        Self { confidence: 0.95 }
    }
}

#[async_trait]
impl TextRecognizer for PayloadRecognizer {
    async fn recognize(&self, frame: &Frame, candidate: &DetectionCandidate) -> Result<PlateReading> {
        let raw_text = String::from_utf8(frame.data.clone())
            .map_err(|e| Error::Validation(e.to_string()))?;
        Ok(PlateReading {
            raw_text,
            recognizer_confidence: self.confidence,
            candidate: candidate.clone(),
        })
    }
}

pub fn normalizer() -> Arc<PlateNormalizer> {
    let grammar = PlateGrammar::for_region("IN").expect("IN grammar");
    Arc::new(PlateNormalizer::new(grammar, 0.7))
}

pub async fn authorize(store: &MemoryAccessStore, plate: &str) {
    store
        .add_authorization(AuthorizationRecord {
            plate_id: plate.into(),
            lot_id: LOT.into(),
            valid_from: Utc::now() - chrono::Duration::days(1),
            valid_until: None,
        })
        .await;
}

/// Memory store whose authorization reads take `delay`
pub struct SlowStore {
    pub inner: MemoryAccessStore,
    pub delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryAccessStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl AuthorizationStore for SlowStore {
    async fn find_valid_authorization(
        &self,
        plate_id: &str,
        lot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_valid_authorization(plate_id, lot_id, now).await
    }

    async fn find_active_block(
        &self,
        plate_id: &str,
        lot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PlateBlock>> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_active_block(plate_id, lot_id, now).await
    }
}

#[async_trait]
impl SessionStore for SlowStore {
    async fn insert_open_if_absent(&self, session: NewSession) -> Result<InsertOutcome> {
        self.inner.insert_open_if_absent(session).await
    }

    async fn complete_open(
        &self,
        plate_id: &str,
        lot_id: &str,
        exit_time: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        self.inner.complete_open(plate_id, lot_id, exit_time).await
    }

    async fn find_open(&self, plate_id: &str, lot_id: &str) -> Result<Option<Session>> {
        self.inner.find_open(plate_id, lot_id).await
    }

    async fn find_completed_since(
        &self,
        plate_id: &str,
        lot_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        self.inner.find_completed_since(plate_id, lot_id, since).await
    }

    async fn list_open(&self, lot_id: &str) -> Result<Vec<Session>> {
        self.inner.list_open(lot_id).await
    }

    async fn occupancy(&self, lot_id: &str, since: DateTime<Utc>) -> Result<OccupancyStats> {
        self.inner.occupancy(lot_id, since).await
    }
}
