//! Supervisor types

use crate::barrier_controller::BarrierState;
use crate::lane_pipeline::{LaneFault, LaneStatus};
use crate::models::Direction;
use crate::sensor_status_tracker::SensorStatus;
use serde::{Deserialize, Serialize};

/// Faults seen per lane since start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneHealth {
    pub lane: Direction,
    pub fault_count: u64,
    pub last_fault: Option<LaneFault>,
}

impl LaneHealth {
    pub fn new(lane: Direction) -> Self {
        Self {
            lane,
            fault_count: 0,
            last_fault: None,
        }
    }
}

/// Everything the API shows for one lane
#[derive(Debug, Clone, Serialize)]
pub struct LaneSnapshot {
    pub lane: Direction,
    pub task_running: bool,
    pub sensor: SensorStatus,
    pub status: LaneStatus,
    pub barrier: BarrierState,
    pub health: LaneHealth,
}
