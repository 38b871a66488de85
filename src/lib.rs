//! Packaging-line telemetry monitor.
//!
//! Correlates line-oriented TCP telemetry from a weighing scale and an
//! optional metal detector into one classified record per bag. A single
//! worker task owns both device sockets and both FIFO queues; the
//! controlling context talks to it only through a stop flag and a one-way
//! event channel.

pub mod classify;
pub mod config;
pub mod correlation;
pub mod device;
pub mod error;
pub mod line_reader;
pub mod metal;
pub mod monitor;
pub mod persistence;
pub mod weigher;

// Re-export commonly used types for easier access
pub use classify::{classify, WeightStatus};
pub use config::{Endpoint, MonitorConfig, SessionConfig};
pub use correlation::{CorrelationQueue, MatchedRecord, QueueDepths, WeightReading};
pub use device::{ConnectionState, DeviceConnection};
pub use error::ReadError;
pub use line_reader::LineStreamReader;
pub use metal::{parse_metal, MetalReading, METAL_THRESHOLD};
pub use monitor::{Monitor, MonitorEvent, SessionStats};
pub use persistence::{ConfigProvider, PersistenceSink, SequenceSource};
pub use weigher::parse_weigher;
