//! Digital output drivers

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;

/// Raw pin access
#[async_trait]
pub trait OutputDriver: Send + Sync {
    async fn write(&self, pin: u32, high: bool) -> Result<()>;

    /// Current level as reported by the hardware
    async fn read(&self, pin: u32) -> Result<bool>;

    fn name(&self) -> &'static str;
}

/// One recorded write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinWrite {
    pub pin: u32,
    pub high: bool,
}

/// In-memory board (simulation mode and tests)
#[derive(Default)]
pub struct SimulatedDriver {
    levels: Mutex<HashMap<u32, bool>>,
    journal: Mutex<Vec<PinWrite>>,
    /// Pins whose writes never take effect
    stuck: Mutex<HashSet<u32>>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a pin ignore writes (read-back fails to confirm)
    pub fn set_stuck(&self, pin: u32, stuck: bool) {
        let mut set = self.stuck.lock().unwrap_or_else(|e| e.into_inner());
        if stuck {
            set.insert(pin);
        } else {
            set.remove(&pin);
        }
    }

    pub fn level(&self, pin: u32) -> bool {
        self.levels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&pin)
            .copied()
            .unwrap_or(false)
    }

    pub fn journal(&self) -> Vec<PinWrite> {
        self.journal.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of low->high writes recorded for a pin
    pub fn rising_writes(&self, pin: u32) -> usize {
        self.journal()
            .iter()
            .filter(|w| w.pin == pin && w.high)
            .count()
    }
}

#[async_trait]
impl OutputDriver for SimulatedDriver {
    async fn write(&self, pin: u32, high: bool) -> Result<()> {
        self.journal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PinWrite { pin, high });

        let stuck = self
            .stuck
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&pin);
        if !stuck {
            self.levels
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(pin, high);
        }

        tracing::trace!(pin = pin, high = high, "Simulated output write");
        Ok(())
    }

    async fn read(&self, pin: u32) -> Result<bool> {
        Ok(self.level(pin))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Linux sysfs GPIO (`/sys/class/gpio`)
pub struct SysfsGpioDriver {
    root: PathBuf,
}

impl SysfsGpioDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn value_path(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin)).join("value")
    }

    /// Export pins and configure them as outputs driven low
    pub async fn init(&self, pins: impl IntoIterator<Item = u32>) -> Result<()> {
        for pin in pins {
            let pin_dir = self.root.join(format!("gpio{}", pin));
            if fs::metadata(&pin_dir).await.is_err() {
                fs::write(self.root.join("export"), pin.to_string())
                    .await
                    .map_err(|e| Error::hardware(format!("gpio{}", pin), format!("export failed: {}", e)))?;
            }
            fs::write(pin_dir.join("direction"), "low")
                .await
                .map_err(|e| Error::hardware(format!("gpio{}", pin), format!("direction failed: {}", e)))?;

            tracing::debug!(pin = pin, "GPIO exported as output");
        }
        Ok(())
    }
}

#[async_trait]
impl OutputDriver for SysfsGpioDriver {
    async fn write(&self, pin: u32, high: bool) -> Result<()> {
        fs::write(self.value_path(pin), if high { "1" } else { "0" }).await?;
        Ok(())
    }

    async fn read(&self, pin: u32) -> Result<bool> {
        let value = fs::read_to_string(self.value_path(pin)).await?;
        Ok(value.trim() == "1")
    }

    fn name(&self) -> &'static str {
        "sysfs"
    }
}
