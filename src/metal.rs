use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Detection threshold, in the same unit as the magnitude the detector
/// reports. Readings at or above this value count as a detection.
pub const METAL_THRESHOLD: i64 = 100;

static FIRST_INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").expect("valid regex"));

/// One metal-detector observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalReading {
    /// 0 = clean, 1 = metal detected.
    pub status: u8,
    /// Raw detected magnitude. `None` only for synthesized neutral
    /// readings in detector-less sessions.
    pub value: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl MetalReading {
    /// Stand-in reading for sessions without a detector.
    pub fn neutral(timestamp: DateTime<Utc>) -> Self {
        Self {
            status: 0,
            value: None,
            timestamp,
        }
    }
}

/// Decodes one metal-detector line.
///
/// Two accepted formats:
/// - bare `"0"` / `"1"`: the binary form carries no magnitude, so a
///   detection reports the threshold constant as its value;
/// - `"<label> - <number...>"`: the first integer after the separator is
///   the magnitude, compared against the threshold for the status.
///
/// Anything else yields `None`.
pub fn parse_metal(line: &str) -> Option<MetalReading> {
    let trimmed = line.trim();
    match trimmed {
        "0" => {
            return Some(MetalReading {
                status: 0,
                value: Some(0),
                timestamp: Utc::now(),
            })
        }
        "1" => {
            return Some(MetalReading {
                status: 1,
                value: Some(METAL_THRESHOLD),
                timestamp: Utc::now(),
            })
        }
        _ => {}
    }

    let (_label, rest) = trimmed.split_once(" - ")?;
    let value: i64 = FIRST_INT_RE
        .captures(rest.trim())?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;
    let status = u8::from(value >= METAL_THRESHOLD);
    Some(MetalReading {
        status,
        value: Some(value),
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_detected() {
        let reading = parse_metal("1").unwrap();
        assert_eq!(reading.status, 1);
        assert_eq!(reading.value, Some(METAL_THRESHOLD));
    }

    #[test]
    fn test_binary_clean() {
        let reading = parse_metal("0").unwrap();
        assert_eq!(reading.status, 0);
        assert_eq!(reading.value, Some(0));
    }

    #[test]
    fn test_labelled_above_threshold() {
        let reading = parse_metal("Detector - 150").unwrap();
        assert_eq!(reading.status, 1);
        assert_eq!(reading.value, Some(150));
    }

    #[test]
    fn test_labelled_below_threshold() {
        let reading = parse_metal("Detector - 50").unwrap();
        assert_eq!(reading.status, 0);
        assert_eq!(reading.value, Some(50));
    }

    #[test]
    fn test_labelled_at_threshold_is_detection() {
        let reading = parse_metal("Detector - 100").unwrap();
        assert_eq!(reading.status, 1);
        assert_eq!(reading.value, Some(100));
    }

    #[test]
    fn test_binary_with_surrounding_whitespace() {
        assert_eq!(parse_metal("  1  ").unwrap().status, 1);
    }

    #[test]
    fn test_extra_trailing_fields_ignored() {
        let reading = parse_metal("Detector - 150 counts peak").unwrap();
        assert_eq!(reading.value, Some(150));
    }

    #[test]
    fn test_rejects_unrecognized_lines() {
        assert!(parse_metal("").is_none());
        assert!(parse_metal("2").is_none());
        assert!(parse_metal("Detector 150").is_none());
        assert!(parse_metal("Detector - none").is_none());
    }

    #[test]
    fn test_neutral_reading() {
        let ts = Utc::now();
        let reading = MetalReading::neutral(ts);
        assert_eq!(reading.status, 0);
        assert_eq!(reading.value, None);
        assert_eq!(reading.timestamp, ts);
    }
}
