//! Application configuration and state
//!
//! Configuration is read once from the environment at startup and is
//! read-only afterwards.

use crate::access_resolver::ResolverConfig;
use crate::barrier_controller::BarrierTiming;
use crate::error::{Error, Result};
use crate::lane_pipeline::LaneConfig;
use crate::models::Direction;
use crate::output_board::{LineMap, LinePurpose, OutputLine};
use crate::plate_normalizer::PlateGrammar;
use crate::session_manager::SessionManagerConfig;
use crate::supervisor::{SupervisorConfig, SystemSupervisor};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Output driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioMode {
    Simulated,
    Sysfs,
}

impl FromStr for GpioMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "simulated" | "sim" => Ok(GpioMode::Simulated),
            "sysfs" => Ok(GpioMode::Sysfs),
            other => Err(Error::Config(format!("unknown GPIO_MODE: {}", other))),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// MySQL URL; `None` runs on the in-memory store
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    /// Plate reader service
    pub anpr_url: String,
    pub anpr_token: Option<String>,
    /// `http(s)://` snapshot URL or `file://<dir>`
    pub entry_camera: String,
    pub exit_camera: String,
    pub entry_lot_id: String,
    pub exit_lot_id: String,
    pub sample_interval_ms: u64,
    pub cooldown_sec: u64,
    pub barrier_open_sec: u64,
    pub barrier_settle_ms: u64,
    pub confirm_tone_ms: u64,
    pub deny_tone_ms: u64,
    pub recognizer_confidence: f32,
    pub plate_region: String,
    pub store_timeout_ms: u64,
    pub recognizer_timeout_ms: u64,
    pub actuation_timeout_ms: u64,
    pub frame_backoff_base_ms: u64,
    pub frame_backoff_max_ms: u64,
    pub session_write_retries: u32,
    pub cooldown_capacity: usize,
    pub allow_exit_with_open_session: bool,
    pub decision_log_capacity: usize,
    pub shutdown_grace_ms: u64,
    pub gpio_mode: GpioMode,
    pub gpio_sysfs_root: PathBuf,
    pub line_map: LineMap,
}

impl AppConfig {
    /// Read from process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary key lookup (unset keys take defaults)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let mut line_map = LineMap::default_pins();
        for lane in Direction::ALL {
            for purpose in LinePurpose::ALL {
                let key = pin_env_key(lane, purpose);
                if let Some(value) = get(&key) {
                    let pin = parse_value(&key, &value)?;
                    line_map.set(OutputLine::new(lane, purpose), pin);
                }
            }
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            host: text("HOST", "0.0.0.0"),
            port: parse_or(&get, "PORT", 8080)?,
            anpr_url: text("ANPR_URL", "http://localhost:9000"),
            anpr_token: get("ANPR_TOKEN"),
            entry_camera: text("ENTRY_CAMERA_URL", "file://frames/entry"),
            exit_camera: text("EXIT_CAMERA_URL", "file://frames/exit"),
            entry_lot_id: text("ENTRY_LOT_ID", "1"),
            exit_lot_id: text("EXIT_LOT_ID", "1"),
            sample_interval_ms: parse_or(&get, "SAMPLE_INTERVAL_MS", 2000)?,
            cooldown_sec: parse_or(&get, "COOLDOWN_SEC", 10)?,
            barrier_open_sec: parse_or(&get, "BARRIER_OPEN_SEC", 15)?,
            barrier_settle_ms: parse_or(&get, "BARRIER_SETTLE_MS", 500)?,
            confirm_tone_ms: parse_or(&get, "CONFIRM_TONE_MS", 200)?,
            deny_tone_ms: parse_or(&get, "DENY_TONE_MS", 1000)?,
            recognizer_confidence: parse_or(&get, "RECOGNIZER_CONFIDENCE", 0.7)?,
            plate_region: text("PLATE_REGION", "IN"),
            store_timeout_ms: parse_or(&get, "STORE_TIMEOUT_MS", 2000)?,
            recognizer_timeout_ms: parse_or(&get, "RECOGNIZER_TIMEOUT_MS", 3000)?,
            actuation_timeout_ms: parse_or(&get, "ACTUATION_TIMEOUT_MS", 1000)?,
            frame_backoff_base_ms: parse_or(&get, "FRAME_BACKOFF_BASE_MS", 500)?,
            frame_backoff_max_ms: parse_or(&get, "FRAME_BACKOFF_MAX_MS", 30_000)?,
            session_write_retries: parse_or(&get, "SESSION_WRITE_RETRIES", 3)?,
            cooldown_capacity: parse_or(&get, "COOLDOWN_CAPACITY", 1024)?,
            allow_exit_with_open_session: parse_or(&get, "ALLOW_EXIT_WITH_OPEN_SESSION", true)?,
            decision_log_capacity: parse_or(&get, "DECISION_LOG_CAPACITY", 500)?,
            shutdown_grace_ms: parse_or(&get, "SHUTDOWN_GRACE_MS", 5000)?,
            gpio_mode: parse_or(&get, "GPIO_MODE", GpioMode::Simulated)?,
            gpio_sysfs_root: PathBuf::from(text("GPIO_SYSFS_ROOT", "/sys/class/gpio")),
            line_map,
        })
    }

    /// Reject settings the lanes cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("SAMPLE_INTERVAL_MS", self.sample_interval_ms),
            ("COOLDOWN_SEC", self.cooldown_sec),
            ("BARRIER_OPEN_SEC", self.barrier_open_sec),
            ("STORE_TIMEOUT_MS", self.store_timeout_ms),
            ("RECOGNIZER_TIMEOUT_MS", self.recognizer_timeout_ms),
            ("ACTUATION_TIMEOUT_MS", self.actuation_timeout_ms),
            ("FRAME_BACKOFF_BASE_MS", self.frame_backoff_base_ms),
            ("SESSION_WRITE_RETRIES", self.session_write_retries as u64),
            ("COOLDOWN_CAPACITY", self.cooldown_capacity as u64),
            ("DECISION_LOG_CAPACITY", self.decision_log_capacity as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", key)));
            }
        }

        if !(0.0..=1.0).contains(&self.recognizer_confidence) {
            return Err(Error::Config(format!(
                "RECOGNIZER_CONFIDENCE must be within 0..=1, got {}",
                self.recognizer_confidence
            )));
        }
        if self.frame_backoff_base_ms > self.frame_backoff_max_ms {
            return Err(Error::Config(
                "FRAME_BACKOFF_BASE_MS exceeds FRAME_BACKOFF_MAX_MS".into(),
            ));
        }
        if PlateGrammar::for_region(&self.plate_region).is_none() {
            return Err(Error::Config(format!(
                "unknown PLATE_REGION: {}",
                self.plate_region
            )));
        }
        self.line_map.validate()
    }

    pub fn lot_id(&self, lane: Direction) -> &str {
        match lane {
            Direction::Entry => &self.entry_lot_id,
            Direction::Exit => &self.exit_lot_id,
        }
    }

    pub fn camera(&self, lane: Direction) -> &str {
        match lane {
            Direction::Entry => &self.entry_camera,
            Direction::Exit => &self.exit_camera,
        }
    }

    pub fn lane_config(&self, lane: Direction) -> LaneConfig {
        LaneConfig {
            lot_id: self.lot_id(lane).to_string(),
            sample_interval: Duration::from_millis(self.sample_interval_ms),
            recognizer_timeout: Duration::from_millis(self.recognizer_timeout_ms),
            cooldown: Duration::from_secs(self.cooldown_sec),
            cooldown_capacity: self.cooldown_capacity,
            frame_backoff_base: Duration::from_millis(self.frame_backoff_base_ms),
            frame_backoff_max: Duration::from_millis(self.frame_backoff_max_ms),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            barrier_timing: BarrierTiming {
                settle: Duration::from_millis(self.barrier_settle_ms),
                hold: Duration::from_secs(self.barrier_open_sec),
                confirm_tone: Duration::from_millis(self.confirm_tone_ms),
                deny_tone: Duration::from_millis(self.deny_tone_ms),
            },
            resolver: ResolverConfig {
                store_timeout: Duration::from_millis(self.store_timeout_ms),
                allow_exit_with_open_session: self.allow_exit_with_open_session,
            },
            sessions: SessionManagerConfig {
                store_timeout: Duration::from_millis(self.store_timeout_ms),
                write_attempts: self.session_write_retries,
                ..SessionManagerConfig::default()
            },
            decision_log_capacity: self.decision_log_capacity,
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }

    /// No database and no real board
    pub fn is_simulation(&self) -> bool {
        self.database_url.is_none() && self.gpio_mode == GpioMode::Simulated
    }
}

fn pin_env_key(lane: Direction, purpose: LinePurpose) -> String {
    let suffix = match purpose {
        LinePurpose::BarrierOpen => "BARRIER",
        LinePurpose::LedGo => "LED_GO",
        LinePurpose::LedStop => "LED_STOP",
        LinePurpose::Buzzer => "BUZZER",
    };
    format!("GPIO_{}_{}", lane.as_db_str(), suffix)
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {}: {}", key, value)))
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match get(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub supervisor: Arc<SystemSupervisor>,
    pub started_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert!(config.database_url.is_none());
        assert!(config.is_simulation());
        assert_eq!(config.port, 8080);
        assert_eq!(config.barrier_open_sec, 15);
        assert_eq!(config.cooldown_sec, 10);
        assert_eq!(config.recognizer_confidence, 0.7);
        assert_eq!(config.gpio_mode, GpioMode::Simulated);
        assert!(config.allow_exit_with_open_session);
        config.validate().unwrap();
    }

    #[test]
    fn test_overrides_and_pins() {
        let config = config(&[
            ("DATABASE_URL", "mysql://gate:pw@db/parking"),
            ("EXIT_LOT_ID", "7"),
            ("GPIO_MODE", "sysfs"),
            ("GPIO_EXIT_BUZZER", "26"),
            ("COOLDOWN_SEC", "5"),
        ])
        .unwrap();

        assert!(!config.is_simulation());
        assert_eq!(config.lot_id(Direction::Exit), "7");
        assert_eq!(
            config
                .line_map
                .pin(OutputLine::new(Direction::Exit, LinePurpose::Buzzer)),
            Some(26)
        );
        assert_eq!(
            config.lane_config(Direction::Exit).cooldown,
            Duration::from_secs(5)
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_unparsable_value_is_config_error() {
        let err = config(&[("PORT", "eighty")]).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        assert!(config(&[("RECOGNIZER_CONFIDENCE", "1.5")])
            .unwrap()
            .validate()
            .is_err());
        assert!(config(&[("BARRIER_OPEN_SEC", "0")])
            .unwrap()
            .validate()
            .is_err());
        assert!(config(&[("PLATE_REGION", "XX")])
            .unwrap()
            .validate()
            .is_err());
        // Entry barrier pin reused for the exit barrier
        assert!(config(&[("GPIO_EXIT_BARRIER", "18")])
            .unwrap()
            .validate()
            .is_err());
    }
}
