//! Per-lane plate cooldown (debounce)

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Last decision time per plate on one lane, bounded and expired lazily
#[derive(Debug)]
pub struct CooldownWindow {
    dwell: Duration,
    capacity: usize,
    entries: HashMap<String, Instant>,
}

impl CooldownWindow {
    pub fn new(dwell: Duration, capacity: usize) -> Self {
        Self {
            dwell,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    /// True while `plate` was decided less than `dwell` ago
    pub fn is_cooling(&self, plate: &str, now: Instant) -> bool {
        self.entries
            .get(plate)
            .map_or(false, |at| now.saturating_duration_since(*at) < self.dwell)
    }

    /// Record (or refresh) a decision for `plate`
    pub fn record(&mut self, plate: &str, now: Instant) {
        self.entries.insert(plate.to_string(), now);
        if self.entries.len() > self.capacity {
            self.purge(now);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, then the oldest until within capacity
    fn purge(&mut self, now: Instant) {
        let dwell = self.dwell;
        self.entries
            .retain(|_, at| now.saturating_duration_since(*at) < dwell);

        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(plate, _)| plate.clone());
            match oldest {
                Some(plate) => {
                    self.entries.remove(&plate);
                }
                None => break,
            }
        }
    }
}
