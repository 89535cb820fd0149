//! SystemSupervisor - owns both lanes
//!
//! ## Responsibilities
//!
//! - Claim each lane's output lines and start its barrier controller
//! - Spawn the ENTRY and EXIT pipelines as independent tasks
//! - Collect lane faults into per-lane health
//! - Shut down with a grace period, force-closing any barrier left behind
//!
//! A fault or panic in one lane never stops the other.

mod types;

pub use types::{LaneHealth, LaneSnapshot};

use crate::access_resolver::{AuthorizationResolver, ResolverConfig};
use crate::access_store::StoreHandles;
use crate::barrier_controller::{BarrierController, BarrierHandle, BarrierTiming};
use crate::decision_log::DecisionLog;
use crate::error::{Error, Result};
use crate::lane_pipeline::{
    spawn_lane, FrameSource, LaneConfig, LaneDeps, LaneFault, LanePipeline, LaneStatus,
    PlateDetector, TextRecognizer,
};
use crate::models::Direction;
use crate::output_board::OutputBoard;
use crate::plate_normalizer::PlateNormalizer;
use crate::sensor_status_tracker::SensorStatusTracker;
use crate::session_manager::{SessionManager, SessionManagerConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

/// One lane to start
pub struct LaneSpec {
    pub lane: Direction,
    pub config: LaneConfig,
    pub source: Box<dyn FrameSource>,
}

/// Shared collaborators
pub struct SupervisorParts {
    pub store: StoreHandles,
    pub board: Arc<OutputBoard>,
    pub detector: Arc<dyn PlateDetector>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub normalizer: Arc<PlateNormalizer>,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub barrier_timing: BarrierTiming,
    pub resolver: ResolverConfig,
    pub sessions: SessionManagerConfig,
    pub decision_log_capacity: usize,
    /// How long lanes get to exit on shutdown
    pub shutdown_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            barrier_timing: BarrierTiming::default(),
            resolver: ResolverConfig::default(),
            sessions: SessionManagerConfig::default(),
            decision_log_capacity: crate::decision_log::DEFAULT_CAPACITY,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

struct RunningLane {
    barrier: BarrierHandle,
    status: watch::Receiver<LaneStatus>,
    task: JoinHandle<()>,
}

pub struct SystemSupervisor {
    store: StoreHandles,
    board: Arc<OutputBoard>,
    detector: Arc<dyn PlateDetector>,
    recognizer: Arc<dyn TextRecognizer>,
    normalizer: Arc<PlateNormalizer>,
    resolver: Arc<AuthorizationResolver>,
    sessions: Arc<SessionManager>,
    decisions: Arc<DecisionLog>,
    sensor_status: Arc<SensorStatusTracker>,
    health: Arc<RwLock<HashMap<Direction, LaneHealth>>>,
    lanes: RwLock<HashMap<Direction, RunningLane>>,
    shutdown_tx: watch::Sender<bool>,
    config: SupervisorConfig,
}

impl SystemSupervisor {
    pub fn new(parts: SupervisorParts, config: SupervisorConfig) -> Self {
        let resolver = Arc::new(AuthorizationResolver::new(
            parts.store.authorizations.clone(),
            parts.store.sessions.clone(),
            config.resolver,
        ));
        let sessions = Arc::new(SessionManager::new(
            parts.store.sessions.clone(),
            config.sessions,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            store: parts.store,
            board: parts.board,
            detector: parts.detector,
            recognizer: parts.recognizer,
            normalizer: parts.normalizer,
            resolver,
            sessions,
            decisions: Arc::new(DecisionLog::new(config.decision_log_capacity)),
            sensor_status: Arc::new(SensorStatusTracker::new()),
            health: Arc::new(RwLock::new(HashMap::new())),
            lanes: RwLock::new(HashMap::new()),
            shutdown_tx,
            config,
        }
    }

    /// Start every lane; each lane must be distinct
    pub async fn start(&self, specs: Vec<LaneSpec>) -> Result<()> {
        let mut lanes = self.lanes.write().await;
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        tokio::spawn(collect_faults(fault_rx, self.health.clone()));

        for spec in specs {
            if lanes.contains_key(&spec.lane) {
                return Err(Error::Conflict(format!("{} lane already running", spec.lane)));
            }

            let outputs = self.board.claim(spec.lane)?;
            let barrier = BarrierController::spawn(outputs, self.config.barrier_timing);

            let lot_id = spec.config.lot_id.clone();
            let pipeline = LanePipeline::new(
                spec.lane,
                spec.config,
                LaneDeps {
                    source: spec.source,
                    detector: self.detector.clone(),
                    recognizer: self.recognizer.clone(),
                    normalizer: self.normalizer.clone(),
                    resolver: self.resolver.clone(),
                    sessions: self.sessions.clone(),
                    barrier: barrier.clone(),
                    sensor_status: self.sensor_status.clone(),
                    decisions: self.decisions.clone(),
                    faults: fault_tx.clone(),
                },
            );
            self.health
                .write()
                .await
                .entry(spec.lane)
                .or_insert_with(|| LaneHealth::new(spec.lane));

            let status = pipeline.subscribe();
            let task = spawn_lane(pipeline, self.shutdown_tx.subscribe());

            tracing::info!(lane = %spec.lane, lot_id = %lot_id, "Lane started");
            lanes.insert(
                spec.lane,
                RunningLane {
                    barrier,
                    status,
                    task,
                },
            );
        }

        tracing::info!(
            lanes = lanes.len(),
            store = self.store.backend,
            driver = self.board.driver_name(),
            "Supervisor started"
        );
        Ok(())
    }

    /// Stop every lane, closing barriers
    pub async fn shutdown(&self) {
        tracing::info!("Supervisor shutting down");
        self.shutdown_tx.send_replace(true);

        let lanes: Vec<(Direction, RunningLane)> = self.lanes.write().await.drain().collect();
        for (lane, mut running) in lanes {
            match tokio::time::timeout(self.config.shutdown_grace, &mut running.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    tracing::error!(lane = %lane, "Lane task panicked");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    tracing::error!(
                        lane = %lane,
                        grace_ms = self.config.shutdown_grace.as_millis() as u64,
                        "Lane did not stop in time, aborting"
                    );
                    running.task.abort();
                }
            }

            if let Err(e) = running.barrier.emergency_close().await {
                tracing::error!(lane = %lane, alarm = true, error = %e, "Barrier close on shutdown failed");
            }
            running.barrier.shutdown().await;
        }
        tracing::info!("Supervisor stopped");
    }

    /// Force a lane's barrier closed (manual control)
    pub async fn close_barrier(&self, lane: Direction) -> Result<()> {
        let barrier = {
            let lanes = self.lanes.read().await;
            lanes
                .get(&lane)
                .map(|l| l.barrier.clone())
                .ok_or_else(|| Error::NotFound(format!("{} lane not running", lane)))?
        };
        tracing::warn!(lane = %lane, "Manual barrier close");
        barrier.emergency_close().await
    }

    pub async fn lane_snapshots(&self) -> Vec<LaneSnapshot> {
        let lanes = self.lanes.read().await;
        let health = self.health.read().await;

        let mut snapshots = Vec::with_capacity(lanes.len());
        for lane in Direction::ALL {
            let Some(running) = lanes.get(&lane) else {
                continue;
            };
            snapshots.push(LaneSnapshot {
                lane,
                task_running: !running.task.is_finished(),
                sensor: self.sensor_status.get_status(lane).await,
                status: running.status.borrow().clone(),
                barrier: running.barrier.state(),
                health: health
                    .get(&lane)
                    .cloned()
                    .unwrap_or_else(|| LaneHealth::new(lane)),
            });
        }
        snapshots
    }

    pub async fn lanes_running(&self) -> usize {
        self.lanes
            .read()
            .await
            .values()
            .filter(|l| !l.task.is_finished())
            .count()
    }

    pub async fn health(&self, lane: Direction) -> Option<LaneHealth> {
        self.health.read().await.get(&lane).cloned()
    }

    pub async fn barrier(&self, lane: Direction) -> Option<BarrierHandle> {
        self.lanes
            .read()
            .await
            .get(&lane)
            .map(|l| l.barrier.clone())
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn decisions(&self) -> &Arc<DecisionLog> {
        &self.decisions
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend
    }
}

async fn collect_faults(
    mut rx: mpsc::UnboundedReceiver<LaneFault>,
    health: Arc<RwLock<HashMap<Direction, LaneHealth>>>,
) {
    while let Some(fault) = rx.recv().await {
        let mut health = health.write().await;
        let entry = health
            .entry(fault.lane)
            .or_insert_with(|| LaneHealth::new(fault.lane));
        entry.fault_count += 1;

        tracing::warn!(
            lane = %fault.lane,
            error_code = %fault.error_code,
            fault_count = entry.fault_count,
            "Lane fault recorded"
        );
        entry.last_fault = Some(fault);
    }
    tracing::debug!("Fault collector stopped");
}
