//! OutputBoard - shared controller board access
//!
//! ## Purpose
//!
//! - Map logical lines (lane + purpose) onto physical pins
//! - Serialize commands per line; different lines run concurrently
//! - Hand each lane an exclusive capability over its own lines
//! - Confirm every write by reading the level back

mod driver;
mod types;

pub use driver::{OutputDriver, PinWrite, SimulatedDriver, SysfsGpioDriver};
pub use types::{LineMap, LinePurpose, OutputLine};

use crate::error::{Error, Result};
use crate::models::Direction;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

/// Default actuation confirm timeout (1s)
const DEFAULT_ACTUATION_TIMEOUT_MS: u64 = 1000;

/// OutputBoard - one physical controller shared by both lanes
pub struct OutputBoard {
    driver: Arc<dyn OutputDriver>,
    map: LineMap,
    /// Per-line locks
    locks: RwLock<HashMap<OutputLine, Arc<Mutex<()>>>>,
    claimed: std::sync::Mutex<HashSet<Direction>>,
    actuation_timeout: Duration,
}

impl OutputBoard {
    pub fn new(driver: Arc<dyn OutputDriver>, map: LineMap) -> Self {
        Self::with_timeout(driver, map, DEFAULT_ACTUATION_TIMEOUT_MS)
    }

    pub fn with_timeout(driver: Arc<dyn OutputDriver>, map: LineMap, timeout_ms: u64) -> Self {
        Self {
            driver,
            map,
            locks: RwLock::new(HashMap::new()),
            claimed: std::sync::Mutex::new(HashSet::new()),
            actuation_timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Take exclusive control of a lane's lines
    ///
    /// - A second claim for the same lane fails until the first is dropped
    pub fn claim(self: &Arc<Self>, lane: Direction) -> Result<LaneOutputs> {
        for purpose in LinePurpose::ALL {
            let line = OutputLine::new(lane, purpose);
            if self.map.pin(line).is_none() {
                return Err(Error::Config(format!("no pin mapped for {}", line)));
            }
        }

        let mut claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        if !claimed.insert(lane) {
            return Err(Error::Conflict(format!(
                "output lines for {} lane already claimed",
                lane
            )));
        }

        tracing::debug!(lane = %lane, driver = self.driver.name(), "Output lines claimed");
        Ok(LaneOutputs {
            lane,
            board: Arc::clone(self),
        })
    }

    /// Drive one line and confirm the level
    ///
    /// - Waits for any in-flight command on the same line
    /// - Lock wait, write and read-back share one deadline
    pub async fn drive(&self, line: OutputLine, high: bool) -> Result<()> {
        let pin = self
            .map
            .pin(line)
            .ok_or_else(|| Error::Config(format!("no pin mapped for {}", line)))?;
        let lock = self.get_or_create_lock(line).await;

        let driver = self.driver.clone();
        let command = async move {
            let _guard = lock.lock_owned().await;
            driver.write(pin, high).await?;
            driver.read(pin).await
        };

        match timeout(self.actuation_timeout, command).await {
            Ok(Ok(level)) if level == high => {
                tracing::trace!(line = %line, pin = pin, high = high, "Output confirmed");
                Ok(())
            }
            Ok(Ok(_)) => Err(Error::hardware(line, format!("pin {} did not reach {}", pin, level_str(high)))),
            Ok(Err(e)) => Err(Error::hardware(line, format!("pin {} write failed: {}", pin, e))),
            Err(_) => Err(Error::hardware(
                line,
                format!(
                    "pin {} not confirmed within {}ms",
                    pin,
                    self.actuation_timeout.as_millis()
                ),
            )),
        }
    }

    async fn get_or_create_lock(&self, line: OutputLine) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(&line) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(line)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, lane: Direction) {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&lane);
        tracing::debug!(lane = %lane, "Output lines released");
    }
}

fn level_str(high: bool) -> &'static str {
    if high {
        "high"
    } else {
        "low"
    }
}

/// A lane's exclusive handle on its four lines - released on Drop
pub struct LaneOutputs {
    lane: Direction,
    board: Arc<OutputBoard>,
}

impl LaneOutputs {
    pub fn lane(&self) -> Direction {
        self.lane
    }

    pub fn line(&self, purpose: LinePurpose) -> OutputLine {
        OutputLine::new(self.lane, purpose)
    }

    pub async fn drive(&self, purpose: LinePurpose, high: bool) -> Result<()> {
        self.board.drive(self.line(purpose), high).await
    }
}

impl Drop for LaneOutputs {
    fn drop(&mut self) {
        self.board.release(self.lane);
    }
}
