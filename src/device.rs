use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::info;

use crate::error::ReadError;
use crate::line_reader::LineStreamReader;

/// Link state of one device, driving reconnect scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Owns one device socket and its line reader.
///
/// Exclusive-ownership rule: only the monitor worker task holds a
/// `DeviceConnection`, so no other execution context can close the socket
/// while a read is in flight. Enforced structurally, not with locks.
pub struct DeviceConnection {
    name: &'static str,
    addr: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    reader: Option<LineStreamReader<TcpStream>>,
}

impl DeviceConnection {
    pub fn new(
        name: &'static str,
        addr: String,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            name,
            addr,
            connect_timeout,
            read_timeout,
            reader: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn state(&self) -> ConnectionState {
        if self.reader.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Opens the TCP connection with the handshake timeout; subsequent
    /// reads use the short read timeout. Any existing connection is
    /// dropped first.
    pub async fn connect(&mut self) -> Result<()> {
        self.disconnect();
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .with_context(|| format!("{} connect to {} timed out", self.name, self.addr))?
            .with_context(|| format!("{} connect to {} failed", self.name, self.addr))?;
        self.reader = Some(LineStreamReader::new(stream, self.read_timeout));
        info!(device = self.name, addr = %self.addr, "device connected");
        Ok(())
    }

    /// Closes the socket and clears the reader. Idempotent.
    pub fn disconnect(&mut self) {
        self.reader = None;
    }

    /// One read attempt on the device link. `Ok(None)` means no complete
    /// line arrived within the read timeout.
    pub async fn read_line(&mut self) -> Result<Option<String>, ReadError> {
        match self.reader.as_mut() {
            Some(reader) => reader.read_line().await,
            None => Ok(None),
        }
    }
}
