//! LanePipeline - frames in, barrier and session actions out
//!
//! ## Responsibilities
//!
//! - Sample frames at a fixed interval, backing off while the source is down
//! - Detect, recognize and normalize candidates, highest confidence first
//! - Debounce repeat sightings of the same plate (per-lane cooldown)
//! - Resolve authorization and act: session write and barrier open run
//!   concurrently on a grant, denial feedback only on a deny
//! - Close the barrier on the way out
//!
//! ## Phases
//!
//! SCANNING -> CANDIDATE -> RECOGNIZING -> DECIDING -> ACTING -> COOLDOWN -> SCANNING
//!
//! One candidate is in flight at a time per lane. Lanes share nothing except
//! the store and the output board.

mod cooldown;
mod sensors;
mod types;

pub use cooldown::CooldownWindow;
pub use sensors::{FrameSource, PlateDetector, TextRecognizer};
pub use types::*;

use crate::access_resolver::{AuthorizationResolver, Decision, DenyReason, SessionHint};
use crate::barrier_controller::{BarrierHandle, OpenOutcome};
use crate::decision_log::DecisionLog;
use crate::error::Error;
use crate::models::{CanonicalPlate, DetectionCandidate, Direction, Frame};
use crate::plate_normalizer::PlateNormalizer;
use crate::sensor_status_tracker::{SensorStatusEvent, SensorStatusTracker};
use crate::session_manager::{SessionClose, SessionManager, SessionOpen};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};

/// Collaborators handed to a lane
pub struct LaneDeps {
    pub source: Box<dyn FrameSource>,
    pub detector: Arc<dyn PlateDetector>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub normalizer: Arc<PlateNormalizer>,
    pub resolver: Arc<AuthorizationResolver>,
    pub sessions: Arc<SessionManager>,
    pub barrier: BarrierHandle,
    pub sensor_status: Arc<SensorStatusTracker>,
    pub decisions: Arc<DecisionLog>,
    pub faults: mpsc::UnboundedSender<LaneFault>,
}

pub struct LanePipeline {
    lane: Direction,
    config: LaneConfig,
    source: Box<dyn FrameSource>,
    detector: Arc<dyn PlateDetector>,
    recognizer: Arc<dyn TextRecognizer>,
    normalizer: Arc<PlateNormalizer>,
    resolver: Arc<AuthorizationResolver>,
    sessions: Arc<SessionManager>,
    barrier: BarrierHandle,
    sensor_status: Arc<SensorStatusTracker>,
    decisions: Arc<DecisionLog>,
    faults: mpsc::UnboundedSender<LaneFault>,
    cooldown: CooldownWindow,
    status: LaneStatus,
    status_tx: watch::Sender<LaneStatus>,
}

impl LanePipeline {
    pub fn new(lane: Direction, config: LaneConfig, deps: LaneDeps) -> Self {
        let status = LaneStatus::new(lane, &config.lot_id);
        let (status_tx, _) = watch::channel(status.clone());
        let cooldown = CooldownWindow::new(config.cooldown, config.cooldown_capacity);

        Self {
            lane,
            config,
            source: deps.source,
            detector: deps.detector,
            recognizer: deps.recognizer,
            normalizer: deps.normalizer,
            resolver: deps.resolver,
            sessions: deps.sessions,
            barrier: deps.barrier,
            sensor_status: deps.sensor_status,
            decisions: deps.decisions,
            faults: deps.faults,
            cooldown,
            status,
            status_tx,
        }
    }

    pub fn lane(&self) -> Direction {
        self.lane
    }

    pub fn barrier(&self) -> &BarrierHandle {
        &self.barrier
    }

    /// Status snapshots, updated on every phase change
    pub fn subscribe(&self) -> watch::Receiver<LaneStatus> {
        self.status_tx.subscribe()
    }

    /// Run until `shutdown` flips to true (or its sender is dropped)
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            lane = %self.lane,
            lot_id = %self.config.lot_id,
            source = %self.source.describe(),
            sample_ms = self.config.sample_interval.as_millis() as u64,
            "Lane pipeline started"
        );
        self.status.running = true;
        self.publish();

        let mut ticker = interval(self.config.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut backoff = self.config.frame_backoff_base;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let frame = tokio::select! {
                frame = self.source.next_frame() => frame,
                _ = shutdown.changed() => break,
            };

            match frame {
                Ok(frame) => {
                    if self.sensor_status.update_status(self.lane, true).await
                        == Some(SensorStatusEvent::Recovered)
                    {
                        backoff = self.config.frame_backoff_base;
                    }
                    self.process_frame(&frame).await;
                }
                Err(e) => {
                    if self.sensor_status.update_status(self.lane, false).await
                        == Some(SensorStatusEvent::Lost)
                    {
                        self.report_fault(&e);
                    }
                    tracing::debug!(
                        lane = %self.lane,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Frame unavailable, backing off"
                    );

                    tokio::select! {
                        _ = sleep(backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                    backoff = (backoff * 2).min(self.config.frame_backoff_max);
                }
            }
        }

        if let Err(e) = self.barrier.emergency_close().await {
            tracing::error!(
                lane = %self.lane,
                alarm = true,
                error = %e,
                "Barrier close on lane shutdown failed"
            );
        }
        self.status.running = false;
        self.set_phase(LanePhase::Scanning);
        tracing::info!(lane = %self.lane, "Lane pipeline stopped");
    }

    /// One SCANNING tick over an already-acquired frame
    pub async fn process_frame(&mut self, frame: &Frame) -> Vec<CandidateOutcome> {
        self.set_phase(LanePhase::Scanning);
        self.status.frames_processed += 1;
        self.status.last_frame_at = Some(frame.captured_at);

        let mut candidates = match timeout(self.config.recognizer_timeout, self.detector.detect(frame)).await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                tracing::debug!(lane = %self.lane, error = %e, "Detector failed, no candidates");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(lane = %self.lane, "Detector timed out, no candidates");
                Vec::new()
            }
        };

        if candidates.is_empty() {
            self.publish();
            return Vec::new();
        }

        candidates.sort_by(|a, b| b.detector_confidence.total_cmp(&a.detector_confidence));

        let mut outcomes = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let outcome = self.process_candidate(frame, candidate).await;
            self.status.last_outcome = Some(outcome.clone());
            outcomes.push(outcome);
        }

        self.set_phase(LanePhase::Scanning);
        outcomes
    }

    async fn process_candidate(&mut self, frame: &Frame, candidate: &DetectionCandidate) -> CandidateOutcome {
        self.set_phase(LanePhase::Candidate);

        self.set_phase(LanePhase::Recognizing);
        let reading = match timeout(
            self.config.recognizer_timeout,
            self.recognizer.recognize(frame, candidate),
        )
        .await
        {
            Ok(Ok(reading)) => reading,
            Ok(Err(e)) => {
                tracing::debug!(lane = %self.lane, error = %e, "Recognizer failed, candidate dropped");
                return CandidateOutcome::Dropped {
                    reason: DropReason::RecognizerFailed,
                };
            }
            Err(_) => {
                tracing::warn!(
                    lane = %self.lane,
                    timeout_ms = self.config.recognizer_timeout.as_millis() as u64,
                    "Recognizer timed out, candidate dropped"
                );
                return CandidateOutcome::Dropped {
                    reason: DropReason::RecognizerTimeout,
                };
            }
        };

        let plate = match self
            .normalizer
            .normalize(&reading.raw_text, reading.recognizer_confidence)
        {
            Ok(plate) => plate,
            Err(reason) => {
                tracing::debug!(
                    lane = %self.lane,
                    raw_text = %reading.raw_text,
                    confidence = reading.recognizer_confidence,
                    reason = %reason,
                    "Reading rejected"
                );
                return CandidateOutcome::Rejected { reason };
            }
        };

        self.set_phase(LanePhase::Deciding);
        if self.cooldown.is_cooling(plate.as_str(), Instant::now()) {
            tracing::debug!(lane = %self.lane, plate = %plate, "Plate in cooldown, skipped");
            return CandidateOutcome::Debounced {
                plate: plate.normalized_text,
            };
        }

        let decision = self
            .resolver
            .resolve(&plate, &self.config.lot_id, self.lane)
            .await;

        self.set_phase(LanePhase::Acting);
        let outcome = match decision {
            Decision::Authorized(hint) => self.grant(&plate, hint).await,
            Decision::Denied(reason) => self.deny(&plate, reason).await,
        };

        self.set_phase(LanePhase::Cooldown);
        self.cooldown.record(plate.as_str(), Instant::now());
        self.status.decisions += 1;
        self.decisions
            .record(self.lane, &self.config.lot_id, &outcome)
            .await;

        outcome
    }

    /// Session write and barrier open, both attempted
    async fn grant(&self, plate: &CanonicalPlate, hint: SessionHint) -> CandidateOutcome {
        let lot_id = self.config.lot_id.as_str();
        let session_write = async {
            match self.lane {
                Direction::Entry => self
                    .sessions
                    .open_session(plate, self.lane, lot_id)
                    .await
                    .map(|opened| match opened {
                        SessionOpen::Created(s) => SessionAction::Opened {
                            session_id: s.session_id,
                        },
                        SessionOpen::AlreadyOpen(s) => SessionAction::AlreadyOpen {
                            session_id: s.session_id,
                        },
                    }),
                Direction::Exit => self
                    .sessions
                    .close_session(plate, self.lane, lot_id)
                    .await
                    .map(|closed| match closed {
                        SessionClose::Closed(s) => SessionAction::Closed {
                            session_id: s.session_id,
                            duration_seconds: s.duration_seconds,
                        },
                        SessionClose::NotFound => SessionAction::NotFound,
                    }),
            }
        };

        let (session_result, barrier_result) = tokio::join!(session_write, self.barrier.open());

        let barrier = match barrier_result {
            Ok(OpenOutcome::Opened) => BarrierAction::Opened,
            Ok(OpenOutcome::Ignored) => BarrierAction::AlreadyOpen,
            Err(e) => {
                self.report_fault(&e);
                BarrierAction::Faulted
            }
        };

        let session = match session_result {
            Ok(action) => action,
            Err(e) => {
                if barrier != BarrierAction::Faulted {
                    tracing::error!(
                        lane = %self.lane,
                        plate = %plate,
                        error_code = e.code(),
                        "Barrier opened without a durable session record"
                    );
                }
                self.report_fault(&e);
                SessionAction::Failed {
                    error_code: e.code().to_string(),
                }
            }
        };

        tracing::info!(
            lane = %self.lane,
            plate = %plate,
            basis = ?hint.basis,
            session = ?session,
            barrier = ?barrier,
            "Access granted"
        );

        CandidateOutcome::Granted {
            plate: plate.normalized_text.clone(),
            basis: hint.basis,
            session,
            barrier,
        }
    }

    async fn deny(&self, plate: &CanonicalPlate, reason: DenyReason) -> CandidateOutcome {
        tracing::info!(
            lane = %self.lane,
            plate = %plate,
            reason = reason.code(),
            "Access denied"
        );

        if reason == DenyReason::StoreUnavailable {
            self.report_fault(&Error::StoreUnavailable(format!(
                "authorization lookup failed for {}",
                plate
            )));
        }
        if let Err(e) = self.barrier.deny_feedback().await {
            self.report_fault(&e);
        }

        CandidateOutcome::Denied {
            plate: plate.normalized_text.clone(),
            reason,
        }
    }

    fn report_fault(&self, error: &Error) {
        let _ = self.faults.send(LaneFault::new(self.lane, error));
    }

    fn set_phase(&mut self, phase: LanePhase) {
        self.status.phase = phase;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }
}

/// Spawn a lane onto the runtime
pub fn spawn_lane(
    pipeline: LanePipeline,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(pipeline.run(shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_resolver::{AuthorizationBasis, ResolverConfig};
    use crate::access_store::{AuthorizationRecord, MemoryAccessStore, SessionStatus};
    use crate::barrier_controller::{BarrierController, BarrierPhase, BarrierTiming};
    use crate::error::Result;
    use crate::models::{BoundingBox, PlateReading};
    use crate::output_board::{LineMap, OutputBoard, SimulatedDriver};
    use crate::plate_normalizer::{PlateGrammar, Rejection};
    use crate::session_manager::SessionManagerConfig;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::time::Duration;

    struct NoFrames;

    #[async_trait]
    impl FrameSource for NoFrames {
        async fn next_frame(&mut self) -> Result<Frame> {
            Err(Error::SensorUnavailable("camera unplugged".into()))
        }

        fn describe(&self) -> String {
            "none".into()
        }
    }

    /// One candidate per distinct text, confidence descending in list order
    struct FixedDetector(Vec<f32>);

    #[async_trait]
    impl PlateDetector for FixedDetector {
        async fn detect(&self, frame: &Frame) -> Result<Vec<DetectionCandidate>> {
            Ok(self
                .0
                .iter()
                .enumerate()
                .map(|(i, conf)| DetectionCandidate {
                    frame_timestamp: frame.captured_at,
                    bbox: BoundingBox {
                        x: i as u32 * 100,
                        y: 0,
                        width: 100,
                        height: 40,
                    },
                    detector_confidence: *conf,
                })
                .collect())
        }
    }

    /// Text keyed by bbox x
    struct MapRecognizer(HashMap<u32, (&'static str, f32)>);

    #[async_trait]
    impl TextRecognizer for MapRecognizer {
        async fn recognize(&self, _frame: &Frame, candidate: &DetectionCandidate) -> Result<PlateReading> {
            let (text, conf) = self
                .0
                .get(&candidate.bbox.x)
                .copied()
                .ok_or_else(|| Error::Internal("no text".into()))?;
            Ok(PlateReading {
                raw_text: text.to_string(),
                recognizer_confidence: conf,
                candidate: candidate.clone(),
            })
        }
    }

    struct Harness {
        pipeline: LanePipeline,
        store: Arc<MemoryAccessStore>,
        driver: Arc<SimulatedDriver>,
        faults: mpsc::UnboundedReceiver<LaneFault>,
        decisions: Arc<DecisionLog>,
    }

    fn harness(
        lane: Direction,
        detector: Vec<f32>,
        texts: Vec<(u32, (&'static str, f32))>,
    ) -> Harness {
        let store = Arc::new(MemoryAccessStore::new());
        let driver = Arc::new(SimulatedDriver::new());
        let board = Arc::new(OutputBoard::new(driver.clone(), LineMap::default_pins()));
        let barrier = BarrierController::spawn(board.claim(lane).unwrap(), BarrierTiming::default());
        let (fault_tx, faults) = mpsc::unbounded_channel();
        let decisions = Arc::new(DecisionLog::default());

        let deps = LaneDeps {
            source: Box::new(NoFrames),
            detector: Arc::new(FixedDetector(detector)),
            recognizer: Arc::new(MapRecognizer(texts.into_iter().collect())),
            normalizer: Arc::new(PlateNormalizer::new(
                PlateGrammar::for_region("IN").unwrap(),
                0.7,
            )),
            resolver: Arc::new(AuthorizationResolver::new(
                store.clone(),
                store.clone(),
                ResolverConfig::default(),
            )),
            sessions: Arc::new(SessionManager::new(store.clone(), SessionManagerConfig::default())),
            barrier,
            sensor_status: Arc::new(SensorStatusTracker::new()),
            decisions: decisions.clone(),
            faults: fault_tx,
        };

        let mut config = LaneConfig::new("1");
        config.cooldown = Duration::from_secs(5);

        Harness {
            pipeline: LanePipeline::new(lane, config, deps),
            store,
            driver,
            faults,
            decisions,
        }
    }

    async fn authorize(store: &MemoryAccessStore, plate: &str) {
        store
            .add_authorization(AuthorizationRecord {
                plate_id: plate.into(),
                lot_id: "1".into(),
                valid_from: Utc::now() - chrono::Duration::days(1),
                valid_until: None,
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_authorized_entry_opens_session_and_barrier() {
        let mut h = harness(Direction::Entry, vec![0.9], vec![(0, ("ka 01 ab 1234", 0.95))]);
        authorize(&h.store, "KA01AB1234").await;

        let outcomes = h.pipeline.process_frame(&Frame::new(vec![1])).await;
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            CandidateOutcome::Granted { plate, basis, session, barrier } => {
                assert_eq!(plate, "KA01AB1234");
                assert_eq!(*basis, AuthorizationBasis::Record);
                assert!(matches!(session, SessionAction::Opened { .. }));
                assert_eq!(*barrier, BarrierAction::Opened);
            }
            other => panic!("expected grant, got {:?}", other),
        }

        let sessions = h.store.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Open);
        assert_eq!(h.driver.rising_writes(18), 1);
        assert_eq!(h.decisions.count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_sighting_is_debounced() {
        let mut h = harness(Direction::Entry, vec![0.9], vec![(0, ("KA01AB1234", 0.95))]);
        authorize(&h.store, "KA01AB1234").await;

        h.pipeline.process_frame(&Frame::new(vec![1])).await;
        let second = h.pipeline.process_frame(&Frame::new(vec![2])).await;
        assert_eq!(
            second,
            vec![CandidateOutcome::Debounced {
                plate: "KA01AB1234".into()
            }]
        );
        assert_eq!(h.store.sessions().await.len(), 1);
        assert_eq!(h.driver.rising_writes(18), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_noise_is_rejected_without_decision() {
        let mut h = harness(
            Direction::Entry,
            vec![0.9, 0.8],
            vec![(0, ("HELLO", 0.99)), (100, ("KA01AB1234", 0.3))],
        );

        let outcomes = h.pipeline.process_frame(&Frame::new(vec![1])).await;
        assert_eq!(
            outcomes,
            vec![
                CandidateOutcome::Rejected {
                    reason: Rejection::FormatInvalid
                },
                CandidateOutcome::Rejected {
                    reason: Rejection::LowConfidence
                },
            ]
        );
        assert_eq!(h.decisions.count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidates_processed_highest_confidence_first() {
        let mut h = harness(
            Direction::Entry,
            vec![0.4, 0.95],
            vec![(0, ("MH12XY9876", 0.9)), (100, ("KA01AB1234", 0.9))],
        );

        let outcomes = h.pipeline.process_frame(&Frame::new(vec![1])).await;
        let plates: Vec<_> = outcomes.iter().filter_map(|o| o.plate()).collect();
        assert_eq!(plates, vec!["KA01AB1234", "MH12XY9876"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_plate_keeps_barrier_closed() {
        let mut h = harness(Direction::Entry, vec![0.9], vec![(0, ("KA01AB1234", 0.95))]);

        let outcomes = h.pipeline.process_frame(&Frame::new(vec![1])).await;
        assert_eq!(
            outcomes,
            vec![CandidateOutcome::Denied {
                plate: "KA01AB1234".into(),
                reason: DenyReason::NotAuthorized
            }]
        );
        assert_eq!(h.pipeline.barrier().state().phase, BarrierPhase::Closed);
        assert!(h.store.sessions().await.is_empty());
        assert!(h.driver.level(22));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_backs_off_and_closes_on_shutdown() {
        let mut h = harness(Direction::Exit, vec![], vec![]);
        let barrier = h.pipeline.barrier().clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_lane(h.pipeline, shutdown_rx);

        // First failed fetch is reported once
        let fault = h.faults.recv().await.unwrap();
        assert_eq!(fault.error_code, "SENSOR_UNAVAILABLE");
        assert_eq!(fault.lane, Direction::Exit);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.faults.try_recv().is_err());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(barrier.state().phase, BarrierPhase::Closed);
    }
}
