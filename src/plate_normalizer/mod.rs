//! PlateNormalizer - raw OCR text to canonical plate
//!
//! ## Responsibilities
//!
//! - Strip whitespace/punctuation and upper-case
//! - Reject low-confidence readings before looking at the text
//! - Validate against the configured region grammar
//!
//! Pure: no I/O, no clock, same input gives same output.

mod grammar;

pub use grammar::{CharClass, PlateFormat, PlateGrammar, Segment};

use crate::models::CanonicalPlate;
use serde::{Deserialize, Serialize};

/// Why a reading was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rejection {
    FormatInvalid,
    LowConfidence,
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::FormatInvalid => "FORMAT_INVALID",
            Rejection::LowConfidence => "LOW_CONFIDENCE",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Canonicalizes recognizer output
#[derive(Debug, Clone)]
pub struct PlateNormalizer {
    grammar: PlateGrammar,
    min_confidence: f32,
}

impl PlateNormalizer {
    pub fn new(grammar: PlateGrammar, min_confidence: f32) -> Self {
        Self {
            grammar,
            min_confidence,
        }
    }

    pub fn grammar(&self) -> &PlateGrammar {
        &self.grammar
    }

    /// Normalize one reading
    pub fn normalize(&self, raw: &str, confidence: f32) -> Result<CanonicalPlate, Rejection> {
        // NaN compares false and is rejected here too
        if !(confidence >= self.min_confidence) {
            return Err(Rejection::LowConfidence);
        }

        let text = canonicalize(raw);
        if self.grammar.matching_format(&text).is_none() {
            return Err(Rejection::FormatInvalid);
        }

        Ok(CanonicalPlate {
            normalized_text: text,
            format_valid: true,
        })
    }
}

/// Keep ASCII alphanumerics, upper-cased
pub fn canonicalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
