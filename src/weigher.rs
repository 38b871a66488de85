use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Protocol prefix every valid weigher telemetry line starts with.
const WEIGHER_PREFIX: &str = "ANR";

static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})").expect("valid regex"));

// Weight is a 4-6 digit gram value terminated by two \x01 control bytes.
static WEIGHT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4,6})\x01\x01").expect("valid regex"));

/// Decodes one weigher line into `(weight_grams, device_timestamp)`.
///
/// Lines not starting with the device prefix, or missing either the
/// embedded timestamp or the control-byte-terminated weight, yield `None`.
/// Malformed input never panics.
pub fn parse_weigher(line: &str) -> Option<(i64, DateTime<Utc>)> {
    if !line.starts_with(WEIGHER_PREFIX) {
        return None;
    }
    let ts_str = TIMESTAMP_RE.captures(line)?.get(1)?.as_str();
    let weight_str = WEIGHT_RE.captures(line)?.get(1)?.as_str();

    let device_ts = NaiveDateTime::parse_from_str(ts_str, "%Y-%m-%dT%H:%M:%S")
        .ok()?
        .and_utc();
    let weight_grams: i64 = weight_str.parse().ok()?;
    Some((weight_grams, device_ts))
}
