//! Declarative plate grammars
//!
//! A region is a list of formats; a format is a list of segments with a
//! character class and a length range. Adding a region is a data change.

use serde::{Deserialize, Serialize};

/// Character class of one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharClass {
    Letter,
    Digit,
    Alphanumeric,
}

impl CharClass {
    fn accepts(&self, c: u8) -> bool {
        match self {
            CharClass::Letter => c.is_ascii_uppercase(),
            CharClass::Digit => c.is_ascii_digit(),
            CharClass::Alphanumeric => c.is_ascii_uppercase() || c.is_ascii_digit(),
        }
    }
}

/// Run of `min..=max` characters of one class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub class: CharClass,
    pub min: usize,
    pub max: usize,
}

impl Segment {
    pub const fn exact(class: CharClass, len: usize) -> Self {
        Self { class, min: len, max: len }
    }

    pub const fn range(class: CharClass, min: usize, max: usize) -> Self {
        Self { class, min, max }
    }
}

/// One accepted plate layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateFormat {
    pub name: String,
    pub segments: Vec<Segment>,
}

impl PlateFormat {
    pub fn new(name: impl Into<String>, segments: Vec<Segment>) -> Self {
        Self {
            name: name.into(),
            segments,
        }
    }

    /// Whole-string match; expects already-canonicalized text
    pub fn matches(&self, text: &str) -> bool {
        match_segments(&self.segments, text.as_bytes())
    }
}

fn match_segments(segments: &[Segment], input: &[u8]) -> bool {
    let Some((seg, rest)) = segments.split_first() else {
        return input.is_empty();
    };

    // Longest run of this class available at the head of the input
    let run = input
        .iter()
        .take(seg.max)
        .take_while(|c| seg.class.accepts(**c))
        .count();
    if run < seg.min {
        return false;
    }

    (seg.min..=run)
        .rev()
        .any(|len| match_segments(rest, &input[len..]))
}

/// Set of formats accepted for one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateGrammar {
    pub region: String,
    pub formats: Vec<PlateFormat>,
}

impl PlateGrammar {
    /// Built-in grammar for a region code
    pub fn for_region(region: &str) -> Option<Self> {
        use CharClass::*;

        let formats = match region.to_ascii_uppercase().as_str() {
            "IN" => vec![
                // KA01AB1234
                PlateFormat::new(
                    "state_standard",
                    vec![
                        Segment::exact(Letter, 2),
                        Segment::exact(Digit, 2),
                        Segment::exact(Letter, 2),
                        Segment::exact(Digit, 4),
                    ],
                ),
                // BH01ABC123, DL4CAF4943
                PlateFormat::new(
                    "state_series",
                    vec![
                        Segment::exact(Letter, 2),
                        Segment::range(Digit, 1, 2),
                        Segment::range(Letter, 1, 3),
                        Segment::range(Digit, 3, 4),
                    ],
                ),
                // 22BH1234AA
                PlateFormat::new(
                    "bharat_series",
                    vec![
                        Segment::exact(Digit, 2),
                        Segment::exact(Letter, 2),
                        Segment::exact(Digit, 4),
                        Segment::range(Letter, 1, 2),
                    ],
                ),
            ],
            "GENERIC" => vec![PlateFormat::new(
                "alphanumeric",
                vec![Segment::range(Alphanumeric, 5, 10)],
            )],
            _ => return None,
        };

        Some(Self {
            region: region.to_ascii_uppercase(),
            formats,
        })
    }

    /// Name of the first matching format
    pub fn matching_format(&self, text: &str) -> Option<&str> {
        self.formats
            .iter()
            .find(|f| f.matches(text))
            .map(|f| f.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indian_formats() {
        let grammar = PlateGrammar::for_region("in").unwrap();
        assert_eq!(grammar.matching_format("KA01AB1234"), Some("state_standard"));
        assert_eq!(grammar.matching_format("BH01ABC123"), Some("state_series"));
        assert_eq!(grammar.matching_format("22BH1234AA"), Some("bharat_series"));
        assert_eq!(grammar.matching_format("KA01AB"), None);
        assert_eq!(grammar.matching_format("1234567890"), None);
    }

    #[test]
    fn test_backtracking_between_ranges() {
        // Letter{1,3} must give characters back for the trailing digit run
        let format = PlateFormat::new(
            "t",
            vec![
                Segment::range(CharClass::Alphanumeric, 1, 4),
                Segment::exact(CharClass::Digit, 3),
            ],
        );
        assert!(format.matches("AB1234"));
        assert!(!format.matches("AB12"));
    }

    #[test]
    fn test_unknown_region() {
        assert!(PlateGrammar::for_region("XX").is_none());
    }
}
