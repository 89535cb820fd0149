//! Output line identities

use crate::error::{Error, Result};
use crate::models::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// What a digital output is wired to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinePurpose {
    BarrierOpen,
    LedGo,
    LedStop,
    Buzzer,
}

impl LinePurpose {
    pub const ALL: [LinePurpose; 4] = [
        LinePurpose::BarrierOpen,
        LinePurpose::LedGo,
        LinePurpose::LedStop,
        LinePurpose::Buzzer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LinePurpose::BarrierOpen => "barrier_open",
            LinePurpose::LedGo => "led_go",
            LinePurpose::LedStop => "led_stop",
            LinePurpose::Buzzer => "buzzer",
        }
    }
}

/// Stable logical output id (lane + purpose)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputLine {
    pub lane: Direction,
    pub purpose: LinePurpose,
}

impl OutputLine {
    pub fn new(lane: Direction, purpose: LinePurpose) -> Self {
        Self { lane, purpose }
    }
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.lane, self.purpose.as_str())
    }
}

/// Logical line -> physical pin mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMap {
    pins: HashMap<OutputLine, u32>,
}

impl LineMap {
    pub fn new(pins: HashMap<OutputLine, u32>) -> Self {
        Self { pins }
    }

    /// Default BCM wiring of the reference controller board
    pub fn default_pins() -> Self {
        use Direction::*;
        use LinePurpose::*;

        let pins = [
            (Entry, BarrierOpen, 18),
            (Exit, BarrierOpen, 19),
            (Entry, LedGo, 20),
            (Exit, LedGo, 21),
            (Entry, Buzzer, 22),
            (Entry, LedStop, 23),
            (Exit, LedStop, 24),
            (Exit, Buzzer, 25),
        ]
        .into_iter()
        .map(|(lane, purpose, pin)| (OutputLine::new(lane, purpose), pin))
        .collect();

        Self { pins }
    }

    pub fn pin(&self, line: OutputLine) -> Option<u32> {
        self.pins.get(&line).copied()
    }

    pub fn set(&mut self, line: OutputLine, pin: u32) {
        self.pins.insert(line, pin);
    }

    /// Every line mapped, no pin shared between lines
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for lane in Direction::ALL {
            for purpose in LinePurpose::ALL {
                let line = OutputLine::new(lane, purpose);
                let pin = self
                    .pin(line)
                    .ok_or_else(|| Error::Config(format!("no pin mapped for {}", line)))?;
                if !seen.insert(pin) {
                    return Err(Error::Config(format!(
                        "pin {} mapped to more than one line (again for {})",
                        pin, line
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn pins(&self) -> impl Iterator<Item = u32> + '_ {
        self.pins.values().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_display() {
        let line = OutputLine::new(Direction::Entry, LinePurpose::BarrierOpen);
        assert_eq!(line.to_string(), "entry.barrier_open");
    }

    #[test]
    fn test_default_pins_valid() {
        assert!(LineMap::default_pins().validate().is_ok());
    }

    #[test]
    fn test_shared_pin_rejected() {
        let mut map = LineMap::default_pins();
        map.set(OutputLine::new(Direction::Exit, LinePurpose::Buzzer), 22);
        assert!(matches!(map.validate(), Err(Error::Config(_))));
    }
}
