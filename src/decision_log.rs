//! DecisionLog - recent lane decisions (ring buffer)
//!
//! ## Responsibilities
//!
//! - Keep the latest authorized/denied decisions in memory
//! - Serve them to the operational API, newest first

use crate::lane_pipeline::CandidateOutcome;
use crate::models::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Default number of decisions kept
pub const DEFAULT_CAPACITY: usize = 500;

/// One recorded decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub record_id: u64,
    pub lane: Direction,
    pub lot_id: String,
    pub plate: String,
    pub outcome: CandidateOutcome,
    pub decided_at: DateTime<Utc>,
}

struct DecisionRing {
    records: VecDeque<DecisionRecord>,
    capacity: usize,
    next_id: u64,
}

impl DecisionRing {
    fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            next_id: 1,
        }
    }

    fn push(&mut self, mut record: DecisionRecord) -> u64 {
        let id = self.next_id;
        record.record_id = id;
        self.next_id += 1;

        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        id
    }
}

pub struct DecisionLog {
    ring: RwLock<DecisionRing>,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(DecisionRing::new(capacity)),
        }
    }

    /// Record a decision outcome; non-decisions are ignored
    pub async fn record(&self, lane: Direction, lot_id: &str, outcome: &CandidateOutcome) -> Option<u64> {
        if !outcome.is_decision() {
            return None;
        }
        let plate = outcome.plate()?.to_string();

        let id = self.ring.write().await.push(DecisionRecord {
            record_id: 0,
            lane,
            lot_id: lot_id.to_string(),
            plate,
            outcome: outcome.clone(),
            decided_at: Utc::now(),
        });
        tracing::debug!(record_id = id, lane = %lane, "Decision recorded");
        Some(id)
    }

    /// Latest decisions, newest first, optionally for one lane
    pub async fn latest(&self, count: usize, lane: Option<Direction>) -> Vec<DecisionRecord> {
        let ring = self.ring.read().await;
        ring.records
            .iter()
            .rev()
            .filter(|r| lane.map_or(true, |l| r.lane == l))
            .take(count)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.ring.read().await.records.len()
    }
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
