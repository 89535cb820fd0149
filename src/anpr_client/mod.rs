//! AnprClient - plate reader service adapter
//!
//! ## Responsibilities
//!
//! - Upload a frame to the plate reader service (multipart)
//! - Map its results onto detection candidates
//! - Serve recognition for those candidates from the same response
//!
//! The service localizes and reads plates in one call, so `detect` does the
//! request and `recognize` answers from the cached results of that frame.
//! Both lanes share one client, so a few recent frames are kept.

use crate::error::{Error, Result};
use crate::lane_pipeline::{PlateDetector, TextRecognizer};
use crate::models::{BoundingBox, DetectionCandidate, Frame, PlateReading};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Plate reader response
#[derive(Debug, Clone, Deserialize)]
pub struct PlateReaderResponse {
    #[serde(default)]
    pub results: Vec<PlateResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlateResult {
    pub plate: String,
    /// Text confidence
    pub score: f32,
    /// Detection confidence
    #[serde(default)]
    pub dscore: Option<f32>,
    #[serde(rename = "box")]
    pub bbox: PlateBox,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PlateBox {
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
}

impl PlateBox {
    fn to_bbox(self) -> BoundingBox {
        let clamp = |v: i64| v.clamp(0, u32::MAX as i64) as u32;
        let x = clamp(self.xmin);
        let y = clamp(self.ymin);
        BoundingBox {
            x,
            y,
            width: clamp(self.xmax).saturating_sub(x),
            height: clamp(self.ymax).saturating_sub(y),
        }
    }
}

/// Frames whose readings stay cached for `recognize`
const CACHED_FRAMES: usize = 8;

/// Readings from one detected frame
struct FrameReadings {
    captured_at: DateTime<Utc>,
    readings: Vec<(BoundingBox, String, f32)>,
}

/// Plate reader HTTP client (detector + recognizer)
pub struct AnprClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    region: String,
    recent: Mutex<VecDeque<FrameReadings>>,
}

impl AnprClient {
    pub fn new(
        base_url: String,
        token: Option<String>,
        region: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            region: region.to_lowercase(),
            recent: Mutex::new(VecDeque::with_capacity(CACHED_FRAMES)),
        })
    }

    /// Check plate reader health
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn read_plates(&self, frame: &Frame) -> Result<PlateReaderResponse> {
        let url = format!("{}/v1/plate-reader/", self.base_url);
        let form = Form::new()
            .part(
                "upload",
                Part::bytes(frame.data.clone())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("regions", self.region.clone())
            .text("timestamp", frame.captured_at.to_rfc3339());

        let mut request = self.client.post(&url).multipart(form);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {}", token));
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "plate reader failed: {} - {}",
                status, body
            )));
        }

        Ok(resp.json().await?)
    }

    fn remember(&self, frame: &Frame, response: &PlateReaderResponse) -> Vec<DetectionCandidate> {
        let mut candidates = Vec::with_capacity(response.results.len());
        let mut readings = Vec::with_capacity(response.results.len());

        for result in &response.results {
            let bbox = result.bbox.to_bbox();
            candidates.push(DetectionCandidate {
                frame_timestamp: frame.captured_at,
                bbox,
                detector_confidence: result.dscore.unwrap_or(result.score),
            });
            readings.push((bbox, result.plate.clone(), result.score));
        }

        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.retain(|cached| cached.captured_at != frame.captured_at);
        if recent.len() >= CACHED_FRAMES {
            recent.pop_front();
        }
        recent.push_back(FrameReadings {
            captured_at: frame.captured_at,
            readings,
        });
        candidates
    }
}

#[async_trait]
impl PlateDetector for AnprClient {
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectionCandidate>> {
        let response = self.read_plates(frame).await?;
        let candidates = self.remember(frame, &response);
        if !candidates.is_empty() {
            tracing::debug!(count = candidates.len(), "Plate reader found candidates");
        }
        Ok(candidates)
    }
}

#[async_trait]
impl TextRecognizer for AnprClient {
    async fn recognize(&self, frame: &Frame, candidate: &DetectionCandidate) -> Result<PlateReading> {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        let cached = recent
            .iter()
            .rev()
            .find(|cached| cached.captured_at == frame.captured_at)
            .ok_or_else(|| Error::NotFound("no plate reader results for frame".into()))?;

        cached
            .readings
            .iter()
            .find(|(bbox, _, _)| *bbox == candidate.bbox)
            .map(|(_, text, score)| PlateReading {
                raw_text: text.clone(),
                recognizer_confidence: *score,
                candidate: candidate.clone(),
            })
            .ok_or_else(|| Error::NotFound("candidate not in plate reader results".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "processing_time": 112.4,
        "results": [
            {"plate": "ka01ab1234", "score": 0.91, "dscore": 0.88,
             "box": {"xmin": 120, "ymin": 300, "xmax": 310, "ymax": 350}},
            {"plate": "mh12xy98", "score": 0.42,
             "box": {"xmin": -4, "ymin": 10, "xmax": 60, "ymax": 30}}
        ]
    }"#;

    fn client() -> AnprClient {
        AnprClient::new(
            "http://localhost:9000/".into(),
            None,
            "IN".into(),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_response() {
        let response: PlateReaderResponse = serde_json::from_str(RESPONSE).unwrap();
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].plate, "ka01ab1234");
        assert_eq!(response.results[1].dscore, None);

        let empty: PlateReaderResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.results.is_empty());
    }

    #[test]
    fn test_box_clamped() {
        let bbox = PlateBox {
            xmin: -4,
            ymin: 10,
            xmax: 60,
            ymax: 30,
        }
        .to_bbox();
        assert_eq!(
            bbox,
            BoundingBox {
                x: 0,
                y: 10,
                width: 60,
                height: 20
            }
        );
    }

    #[tokio::test]
    async fn test_recognize_from_last_frame() {
        let client = client();
        let frame = Frame::new(vec![0xff, 0xd8]);
        let response: PlateReaderResponse = serde_json::from_str(RESPONSE).unwrap();

        let candidates = client.remember(&frame, &response);
        assert_eq!(candidates[0].detector_confidence, 0.88);
        assert_eq!(candidates[1].detector_confidence, 0.42);

        let reading = client.recognize(&frame, &candidates[0]).await.unwrap();
        assert_eq!(reading.raw_text, "ka01ab1234");
        assert_eq!(reading.recognizer_confidence, 0.91);

        // A different frame has no cached results
        let other = Frame {
            captured_at: frame.captured_at + chrono::Duration::seconds(2),
            data: vec![],
        };
        assert!(client.recognize(&other, &candidates[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_interleaved_frames_keep_results() {
        let client = client();
        let response: PlateReaderResponse = serde_json::from_str(RESPONSE).unwrap();
        let entry = Frame::new(vec![1]);
        let exit = Frame {
            captured_at: entry.captured_at + chrono::Duration::milliseconds(5),
            data: vec![2],
        };

        let entry_candidates = client.remember(&entry, &response);
        client.remember(&exit, &PlateReaderResponse { results: vec![] });

        let reading = client.recognize(&entry, &entry_candidates[0]).await.unwrap();
        assert_eq!(reading.raw_text, "ka01ab1234");

        for i in 0..CACHED_FRAMES as i64 {
            let frame = Frame {
                captured_at: exit.captured_at + chrono::Duration::seconds(i + 1),
                data: vec![],
            };
            client.remember(&frame, &PlateReaderResponse { results: vec![] });
        }
        assert!(client.recognize(&entry, &entry_candidates[0]).await.is_err());
    }

    #[test]
    fn test_base_url_normalized() {
        assert_eq!(client().base_url, "http://localhost:9000");
        assert_eq!(client().region, "in");
    }
}
