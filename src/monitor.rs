use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::classify::WeightStatus;
use crate::config::{MonitorConfig, SessionConfig};
use crate::correlation::{CorrelationQueue, MatchedRecord, QueueDepths, WeightReading};
use crate::device::DeviceConnection;
use crate::metal::parse_metal;
use crate::persistence::{PersistenceSink, SequenceSource};
use crate::weigher::parse_weigher;

const WEIGHER_CONNECT_ATTEMPTS: u32 = 3;
const WEIGHER_RETRY_DELAY: Duration = Duration::from_secs(2);
const METAL_CONNECT_ATTEMPTS: u32 = 2;
const METAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(3);
const ITERATION_FAILURE_PAUSE: Duration = Duration::from_millis(100);

/// Running session counters, mirrored to the display on each diagnostic
/// event. A metal detection counts as a failure regardless of weight.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total: u64,
    pub passed: u64,
    pub under: u64,
    pub over: u64,
    pub metal: u64,
}

impl SessionStats {
    fn record(&mut self, rec: &MatchedRecord) {
        self.total += 1;
        if rec.metal_status == 1 {
            self.metal += 1;
        } else {
            match rec.weight_status {
                WeightStatus::Under => self.under += 1,
                WeightStatus::Pass => self.passed += 1,
                WeightStatus::Over => self.over += 1,
            }
        }
    }
}

/// One-way handoff from the monitor worker to the display layer. The
/// worker never waits for the consumer.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Matched(MatchedRecord),
    Diagnostic {
        depths: QueueDepths,
        stats: SessionStats,
    },
}

/// Rate limit for reconnect attempts on a downed device link.
struct ReconnectGate {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl ReconnectGate {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_attempt: None,
        }
    }

    fn ready(&self, now: Instant) -> bool {
        match self.last_attempt {
            None => true,
            Some(at) => now.duration_since(at) >= self.interval,
        }
    }

    /// Stamps both reconnect attempts and the disconnect itself, so a
    /// fresh disconnect opens a full quiet window.
    fn stamp(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }
}

/// Handle to a running monitor session.
pub struct Monitor {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Monitor {
    /// Requests cooperative shutdown and joins the worker with a bounded
    /// wait. The worker drains fully-paired readings, disconnects both
    /// devices and clears the queues before exiting; if it fails to
    /// observe the flag in time it is aborted.
    pub async fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if timeout(STOP_JOIN_TIMEOUT, &mut self.task).await.is_err() {
            warn!("monitor worker did not stop within bound, aborting");
            self.task.abort();
        }
    }
}

/// Starts a production session.
///
/// The weigher must connect (3 attempts, 2 s apart) or the start fails.
/// The metal detector (when configured and requested) gets 2 attempts 1 s
/// apart; failure is non-fatal and the session proceeds with
/// `has_metal_detector = false`. On success the queues start empty, the
/// sequence counter is seeded from the external source, and the worker
/// task is spawned as the sole owner of both device connections.
pub async fn start(
    cfg: MonitorConfig,
    mut session: SessionConfig,
    sink: Box<dyn PersistenceSink>,
    sequence: &mut dyn SequenceSource,
    events: UnboundedSender<MonitorEvent>,
) -> Result<Monitor> {
    let mut weigher = DeviceConnection::new(
        "weigher",
        cfg.weigher.addr(),
        cfg.weigher_connect_timeout,
        cfg.read_timeout,
    );
    let mut connected = false;
    for attempt in 1..=WEIGHER_CONNECT_ATTEMPTS {
        match weigher.connect().await {
            Ok(()) => {
                connected = true;
                break;
            }
            Err(e) => warn!(attempt, "weigher connect attempt failed: {e:#}"),
        }
        if attempt < WEIGHER_CONNECT_ATTEMPTS {
            sleep(WEIGHER_RETRY_DELAY).await;
        }
    }
    if !connected {
        bail!("weigher unreachable at {}", cfg.weigher.addr());
    }

    let mut metal = None;
    if session.has_metal_detector {
        match cfg.metal.as_ref() {
            None => {
                warn!("no metal endpoint configured, continuing without detection");
                session.has_metal_detector = false;
            }
            Some(endpoint) => {
                let mut conn = DeviceConnection::new(
                    "metal",
                    endpoint.addr(),
                    cfg.metal_connect_timeout,
                    cfg.read_timeout,
                );
                let mut metal_up = false;
                for attempt in 1..=METAL_CONNECT_ATTEMPTS {
                    match conn.connect().await {
                        Ok(()) => {
                            metal_up = true;
                            break;
                        }
                        Err(e) => warn!(attempt, "metal connect attempt failed: {e:#}"),
                    }
                    if attempt < METAL_CONNECT_ATTEMPTS {
                        sleep(METAL_RETRY_DELAY).await;
                    }
                }
                if metal_up {
                    metal = Some(conn);
                } else {
                    warn!("metal detector unreachable, continuing without detection");
                    session.has_metal_detector = false;
                }
            }
        }
    }

    let next_sequence = match sequence.next_id() {
        Ok(id) => id,
        Err(e) => {
            warn!("sequence source unavailable, starting at 1: {e:#}");
            1
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let now = Instant::now();
    let worker = MonitorWorker {
        weigher_gate: ReconnectGate::new(cfg.reconnect_interval),
        metal_gate: ReconnectGate::new(cfg.reconnect_interval),
        last_cleanup: now,
        last_depth_log: now,
        cfg,
        session,
        weigher,
        metal,
        queues: CorrelationQueue::new(),
        sink,
        next_sequence,
        stats: SessionStats::default(),
        events,
        stop: Arc::clone(&stop),
    };
    info!(
        production_id = worker.session.production_id,
        detector = worker.session.has_metal_detector,
        first_sequence = next_sequence,
        "production session started"
    );
    let task = tokio::spawn(worker.run());
    Ok(Monitor { stop, task })
}

/// Sole owner of both device connections and both queues. All socket
/// operations happen on this task; the controlling context communicates
/// only via the stop flag and the event channel.
struct MonitorWorker {
    cfg: MonitorConfig,
    session: SessionConfig,
    weigher: DeviceConnection,
    metal: Option<DeviceConnection>,
    queues: CorrelationQueue,
    sink: Box<dyn PersistenceSink>,
    next_sequence: i64,
    stats: SessionStats,
    events: UnboundedSender<MonitorEvent>,
    stop: Arc<AtomicBool>,
    weigher_gate: ReconnectGate,
    metal_gate: ReconnectGate,
    last_cleanup: Instant,
    last_depth_log: Instant,
}

impl MonitorWorker {
    /// The loop never terminates involuntarily: a failed iteration is
    /// logged and followed by a short pause, and polling resumes.
    async fn run(mut self) {
        info!("monitor loop started");
        while !self.stop.load(Ordering::Relaxed) {
            if let Err(e) = self.iteration().await {
                error!("monitor iteration failed: {e:#}");
                sleep(ITERATION_FAILURE_PAUSE).await;
            }
            sleep(self.cfg.poll_interval).await;
        }

        // Final drain of any fully-paired remainder, then release the
        // sockets and discard whatever could not be paired.
        self.flush_matches();
        self.weigher.disconnect();
        if let Some(metal) = self.metal.as_mut() {
            metal.disconnect();
        }
        self.queues.clear();
        info!(total = self.stats.total, "monitor loop stopped");
    }

    async fn iteration(&mut self) -> Result<()> {
        self.poll_weigher().await;
        self.poll_metal().await;
        self.flush_matches();

        if self.last_cleanup.elapsed() >= self.cfg.cleanup_interval {
            self.queues.cleanup(Utc::now(), true);
            self.last_cleanup = Instant::now();
        }
        if self.last_depth_log.elapsed() >= self.cfg.depth_log_interval {
            let depths = self.queues.depths();
            debug!(
                weigher = depths.weigher,
                metal = depths.metal,
                "queue depths"
            );
            let _ = self.events.send(MonitorEvent::Diagnostic {
                depths,
                stats: self.stats,
            });
            self.last_depth_log = Instant::now();
        }
        Ok(())
    }

    async fn poll_weigher(&mut self) {
        if self.weigher.is_connected() {
            match self.weigher.read_line().await {
                Ok(Some(line)) => {
                    if let Some((weight_grams, device_ts)) = parse_weigher(&line) {
                        let reading = WeightReading {
                            weight_grams,
                            device_timestamp: Some(device_ts),
                            arrival: Utc::now(),
                            sequence_id: self.next_sequence,
                        };
                        self.next_sequence += 1;
                        self.queues.push_weight(reading);
                        info!(
                            grams = weight_grams,
                            queued = self.queues.depths().weigher,
                            "weigher reading"
                        );
                    } else {
                        debug!(line = %line, "unparseable weigher line dropped");
                    }
                }
                // No data within the read timeout: the device is push-only.
                Ok(None) => {}
                Err(e) => {
                    warn!("weigher link lost: {e}");
                    self.weigher.disconnect();
                    self.weigher_gate.stamp(Instant::now());
                }
            }
        } else {
            let now = Instant::now();
            if self.weigher_gate.ready(now) {
                self.weigher_gate.stamp(now);
                if let Err(e) = self.weigher.connect().await {
                    warn!("weigher reconnect failed: {e:#}");
                }
            }
        }
    }

    async fn poll_metal(&mut self) {
        // A detector that never joined the session is not polled; one that
        // dropped mid-session stays configured and reconnects.
        let Some(metal) = self.metal.as_mut() else {
            return;
        };
        if metal.is_connected() {
            match metal.read_line().await {
                Ok(Some(line)) => {
                    if let Some(reading) = parse_metal(&line) {
                        info!(
                            status = reading.status,
                            value = ?reading.value,
                            queued = self.queues.depths().metal + 1,
                            "metal reading"
                        );
                        self.queues.push_metal(reading);
                    } else {
                        debug!(line = %line, "unparseable metal line dropped");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("metal link lost: {e}");
                    metal.disconnect();
                    self.metal_gate.stamp(Instant::now());
                }
            }
        } else {
            let now = Instant::now();
            if self.metal_gate.ready(now) {
                self.metal_gate.stamp(now);
                if let Err(e) = metal.connect().await {
                    warn!("metal reconnect failed: {e:#}");
                }
            }
        }
    }

    /// Pairs everything currently matchable and hands each record to
    /// persistence and the display. A failed append drops that record.
    fn flush_matches(&mut self) {
        for record in self.queues.try_match(&self.session) {
            self.stats.record(&record);
            if let Err(e) = self.sink.append(self.session.production_id, &record) {
                error!(
                    sequence = record.sequence_id,
                    "persist failed, record dropped: {e:#}"
                );
            }
            let _ = self.events.send(MonitorEvent::Matched(record));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_reconnect_gate_ready_when_fresh() {
        let gate = ReconnectGate::new(Duration::from_secs(5));
        assert!(gate.ready(Instant::now()));
    }

    #[test]
    fn test_reconnect_gate_enforces_quiet_window() {
        let mut gate = ReconnectGate::new(Duration::from_secs(5));
        let t0 = Instant::now();
        gate.stamp(t0);
        assert!(!gate.ready(t0 + Duration::from_secs(4)));
        assert!(gate.ready(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_reconnect_gate_restamps() {
        let mut gate = ReconnectGate::new(Duration::from_secs(5));
        let t0 = Instant::now();
        gate.stamp(t0);
        // A second disconnect observation inside the window re-opens it.
        gate.stamp(t0 + Duration::from_secs(3));
        assert!(!gate.ready(t0 + Duration::from_secs(7)));
        assert!(gate.ready(t0 + Duration::from_secs(8)));
    }

    fn record(weight_status: WeightStatus, metal_status: u8) -> MatchedRecord {
        MatchedRecord {
            sequence_id: 1,
            weight_grams: 25100,
            weight_status,
            metal_status,
            metal_value: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_stats_count_by_status() {
        let mut stats = SessionStats::default();
        stats.record(&record(WeightStatus::Pass, 0));
        stats.record(&record(WeightStatus::Under, 0));
        stats.record(&record(WeightStatus::Over, 0));
        assert_eq!(stats.total, 3);
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.under, 1);
        assert_eq!(stats.over, 1);
        assert_eq!(stats.metal, 0);
    }

    #[test]
    fn test_metal_detection_overrides_weight_verdict() {
        let mut stats = SessionStats::default();
        stats.record(&record(WeightStatus::Pass, 1));
        assert_eq!(stats.total, 1);
        assert_eq!(stats.metal, 1);
        assert_eq!(stats.passed, 0);
    }
}
