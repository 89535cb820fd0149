//! Sensor seams: frame source, plate detector, text recognizer

use crate::error::Result;
use crate::models::{DetectionCandidate, Frame, PlateReading};
use async_trait::async_trait;

/// Pull-based frame stream, owned by one lane
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Next frame; `Err(SensorUnavailable)` when the device is down
    async fn next_frame(&mut self) -> Result<Frame>;

    fn describe(&self) -> String;
}

#[async_trait]
pub trait PlateDetector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectionCandidate>>;
}

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, frame: &Frame, candidate: &DetectionCandidate) -> Result<PlateReading>;
}
