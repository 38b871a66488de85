use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classify::{classify, WeightStatus};
use crate::config::SessionConfig;
use crate::metal::MetalReading;

/// Queue entries older than this are dropped by stopped-state cleanup.
const STALE_AFTER_SECS: i64 = 3600;

/// Queue depth above which running-state cleanup logs the backlog.
const DEPTH_REPORT_THRESHOLD: usize = 10;

/// One weigher observation, owned by the monitor loop until matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightReading {
    pub weight_grams: i64,
    /// Timestamp embedded in the device frame, preferred for the stored
    /// record over our own wall clock.
    pub device_timestamp: Option<DateTime<Utc>>,
    /// Local wall clock at enqueue time; drives stale-entry cleanup.
    pub arrival: DateTime<Utc>,
    /// Strictly increasing within a session, assigned at enqueue.
    pub sequence_id: i64,
}

/// A correlated weigher + metal-detector pair for one physical bag.
/// Immutable once created; handed once to persistence and once to display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedRecord {
    pub sequence_id: i64,
    pub weight_grams: i64,
    pub weight_status: WeightStatus,
    pub metal_status: u8,
    pub metal_value: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of both queue depths for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueDepths {
    pub weigher: usize,
    pub metal: usize,
}

/// FIFO pairing of the two independently-timed device streams.
///
/// Metal readings are paired strictly by arrival order, not by timestamp
/// proximity: physical transit time between scale and detector keeps the
/// streams roughly aligned, and strict FIFO avoids any ambiguous
/// nearest-neighbor heuristic.
#[derive(Default)]
pub struct CorrelationQueue {
    weigher: VecDeque<WeightReading>,
    metal: VecDeque<MetalReading>,
}

impl CorrelationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_weight(&mut self, reading: WeightReading) {
        self.weigher.push_back(reading);
    }

    pub fn push_metal(&mut self, reading: MetalReading) {
        self.metal.push_back(reading);
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            weigher: self.weigher.len(),
            metal: self.metal.len(),
        }
    }

    pub fn clear(&mut self) {
        self.weigher.clear();
        self.metal.clear();
    }

    /// Drains every currently pairable reading into matched records.
    ///
    /// With a detector, oldest weigher and oldest metal readings pair up
    /// while both queues are non-empty. Without one, every weigher reading
    /// pairs with a synthesized neutral metal reading.
    pub fn try_match(&mut self, session: &SessionConfig) -> Vec<MatchedRecord> {
        let mut records = Vec::new();
        if session.has_metal_detector {
            while !self.weigher.is_empty() && !self.metal.is_empty() {
                let wr = self.weigher.pop_front().expect("checked non-empty");
                let mr = self.metal.pop_front().expect("checked non-empty");
                records.push(Self::pair(wr, mr, session));
            }
        } else {
            while let Some(wr) = self.weigher.pop_front() {
                let ts = wr.device_timestamp.unwrap_or(wr.arrival);
                let mr = MetalReading::neutral(ts);
                records.push(Self::pair(wr, mr, session));
            }
        }
        records
    }

    fn pair(wr: WeightReading, mr: MetalReading, session: &SessionConfig) -> MatchedRecord {
        MatchedRecord {
            sequence_id: wr.sequence_id,
            weight_grams: wr.weight_grams,
            weight_status: classify(
                wr.weight_grams,
                session.under_limit_grams,
                session.over_limit_grams,
            ),
            metal_status: mr.status,
            metal_value: mr.value,
            timestamp: wr.device_timestamp.unwrap_or(wr.arrival),
        }
    }

    /// Stale-entry policy. While the session is running nothing is ever
    /// removed: every queued weigher reading is guaranteed to eventually
    /// meet its metal reading as the bag physically passes the detector.
    /// Only after the session stops are entries older than one hour
    /// dropped. Returns `(weigher_removed, metal_removed)`.
    pub fn cleanup(&mut self, now: DateTime<Utc>, running: bool) -> (usize, usize) {
        if running {
            let depths = self.depths();
            if depths.weigher > DEPTH_REPORT_THRESHOLD || depths.metal > DEPTH_REPORT_THRESHOLD {
                info!(
                    weigher = depths.weigher,
                    metal = depths.metal,
                    "in-transit bag backlog"
                );
            }
            return (0, 0);
        }

        let horizon = now - Duration::seconds(STALE_AFTER_SECS);
        let w_before = self.weigher.len();
        self.weigher.retain(|r| r.arrival >= horizon);
        let m_before = self.metal.len();
        self.metal.retain(|r| r.timestamp >= horizon);

        let removed = (w_before - self.weigher.len(), m_before - self.metal.len());
        if removed.0 > 0 || removed.1 > 0 {
            debug!(
                weigher = removed.0,
                metal = removed.1,
                "dropped stale readings after stop"
            );
        }
        removed
    }
}
