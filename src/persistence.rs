use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use crate::correlation::MatchedRecord;

/// Durable append target for matched records. Called from the monitor
/// worker; an implementation may block up to its own bound, and a failed
/// append is logged and the record dropped rather than retried in-process.
pub trait PersistenceSink: Send {
    fn append(&mut self, production_id: i64, record: &MatchedRecord) -> Result<()>;
}

/// Source of the first sequence id for a session, queried once at start.
pub trait SequenceSource: Send {
    fn next_id(&mut self) -> Result<i64>;
}

/// Supplies the session weight limits from master data.
pub trait ConfigProvider: Send {
    /// Returns `(under_limit_grams, over_limit_grams)`.
    fn limits(&self) -> Result<(i64, i64)>;
}

/// Append-only JSON-lines sink, one record per line.
pub struct JsonlSink {
    file: File,
}

impl JsonlSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open record log {}", path.display()))?;
        Ok(Self { file })
    }
}

impl PersistenceSink for JsonlSink {
    fn append(&mut self, production_id: i64, record: &MatchedRecord) -> Result<()> {
        let row = json!({
            "sequence_id": record.sequence_id,
            "production_id": production_id,
            "timestamp": record.timestamp,
            "weight_grams": record.weight_grams,
            "weight_status": record.weight_status,
            "metal_status": record.metal_status,
            "metal_value": record.metal_value,
        });
        serde_json::to_writer(&mut self.file, &row).context("serialize record")?;
        self.file.write_all(b"\n").context("append record")?;
        self.file.flush().context("flush record log")?;
        Ok(())
    }
}

/// In-memory counter for sessions without an external id allocator.
pub struct LocalSequenceSource {
    next: i64,
}

impl LocalSequenceSource {
    pub fn starting_at(next: i64) -> Self {
        Self { next }
    }
}

impl SequenceSource for LocalSequenceSource {
    fn next_id(&mut self) -> Result<i64> {
        let id = self.next;
        self.next += 1;
        Ok(id)
    }
}

/// Static weight limits, for wiring and tests.
pub struct FixedLimits {
    pub under_limit_grams: i64,
    pub over_limit_grams: i64,
}

impl ConfigProvider for FixedLimits {
    fn limits(&self) -> Result<(i64, i64)> {
        Ok((self.under_limit_grams, self.over_limit_grams))
    }
}
