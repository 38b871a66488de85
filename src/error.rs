use thiserror::Error;

/// Failure modes for a device socket read.
///
/// A read timeout is deliberately NOT represented here: the devices are
/// push-only and transmit sporadically, so "no data within the read
/// timeout" is the normal outcome and surfaces as `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The peer closed its side of the connection (zero-byte read).
    #[error("connection closed by remote")]
    Closed,

    /// Any other socket-level failure.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
