//! Sensor Status Tracker
//!
//! Tracks each lane's frame source online/offline state.
//! Only transitions are logged so a dead camera does not flood the log.

use crate::models::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Frame source connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorStatus {
    /// No frame requested yet
    Unknown,
    Online,
    Offline,
}

/// Status transition event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorStatusEvent {
    Lost,
    Recovered,
}

#[derive(Default)]
pub struct SensorStatusTracker {
    statuses: RwLock<HashMap<Direction, SensorStatus>>,
}

impl SensorStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update a lane's sensor status and return the transition, if any
    ///
    /// - `Some(Lost)`: Online -> Offline, or the very first fetch failed
    /// - `Some(Recovered)`: Offline -> Online
    pub async fn update_status(&self, lane: Direction, is_online: bool) -> Option<SensorStatusEvent> {
        let mut statuses = self.statuses.write().await;
        let prev = statuses.get(&lane).copied().unwrap_or(SensorStatus::Unknown);
        let next = if is_online {
            SensorStatus::Online
        } else {
            SensorStatus::Offline
        };
        statuses.insert(lane, next);

        match (prev, next) {
            (SensorStatus::Online, SensorStatus::Offline) => {
                tracing::warn!(lane = %lane, "Frame source lost");
                Some(SensorStatusEvent::Lost)
            }
            (SensorStatus::Unknown, SensorStatus::Offline) => {
                tracing::warn!(lane = %lane, "Frame source unavailable on first fetch");
                Some(SensorStatusEvent::Lost)
            }
            (SensorStatus::Offline, SensorStatus::Online) => {
                tracing::info!(lane = %lane, "Frame source recovered");
                Some(SensorStatusEvent::Recovered)
            }
            _ => None,
        }
    }

    pub async fn get_status(&self, lane: Direction) -> SensorStatus {
        self.statuses
            .read()
            .await
            .get(&lane)
            .copied()
            .unwrap_or(SensorStatus::Unknown)
    }

    pub async fn offline_lanes(&self) -> Vec<Direction> {
        let statuses = self.statuses.read().await;
        Direction::ALL
            .into_iter()
            .filter(|lane| statuses.get(lane) == Some(&SensorStatus::Offline))
            .collect()
    }
}
