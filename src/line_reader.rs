use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::error::ReadError;

const RECV_CHUNK_SIZE: usize = 4096;

/// Buffered line extraction over a raw byte stream.
///
/// Reads with `recv()` + a manual buffer instead of a buffered line
/// abstraction over the socket: a `BufReader`-style wrapper can be left in
/// an unusable state after one read timeout, whereas this reader keeps its
/// partial buffer and can simply be called again.
pub struct LineStreamReader<S> {
    stream: S,
    read_timeout: Duration,
    buffer: Vec<u8>,
}

impl<S: AsyncRead + Unpin> LineStreamReader<S> {
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self {
            stream,
            read_timeout,
            buffer: Vec::new(),
        }
    }

    /// Returns the next complete `\n`-delimited line, with the trailing
    /// `\r` stripped.
    ///
    /// If no complete line is buffered, performs exactly one receive with
    /// the configured timeout. `Ok(None)` means no line is available yet;
    /// the buffered partial data is kept for the next call.
    pub async fn read_line(&mut self) -> Result<Option<String>, ReadError> {
        if let Some(line) = self.take_buffered_line() {
            return Ok(Some(line));
        }

        let mut chunk = [0u8; RECV_CHUNK_SIZE];
        match timeout(self.read_timeout, self.stream.read(&mut chunk)).await {
            // No data within the read timeout: normal for push-only devices.
            Err(_elapsed) => Ok(None),
            Ok(Ok(0)) => Err(ReadError::Closed),
            Ok(Ok(n)) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                Ok(self.take_buffered_line())
            }
            Ok(Err(e)) => Err(ReadError::Io(e)),
        }
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(decode_permissive(&line))
    }
}

/// Decodes bytes one-to-one into chars (Latin-1 style) so that non-text
/// control bytes in device frames survive intact.
fn decode_permissive(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    const TEST_TIMEOUT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_reads_complete_line() {
        let mock = tokio_test::io::Builder::new().read(b"hello\n").build();
        let mut reader = LineStreamReader::new(mock, TEST_TIMEOUT);

        let line = reader.read_line().await.unwrap();
        assert_eq!(line, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_strips_carriage_return() {
        let mock = tokio_test::io::Builder::new().read(b"hello\r\n").build();
        let mut reader = LineStreamReader::new(mock, TEST_TIMEOUT);

        let line = reader.read_line().await.unwrap();
        assert_eq!(line, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_reassembles_line_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"hel")
            .read(b"lo\nworld\n")
            .build();
        let mut reader = LineStreamReader::new(mock, TEST_TIMEOUT);

        // First call buffers the partial chunk and reports nothing yet.
        assert_eq!(reader.read_line().await.unwrap(), None);
        assert_eq!(
            reader.read_line().await.unwrap(),
            Some("hello".to_string())
        );
        // Second line was already buffered, no further receive needed.
        assert_eq!(
            reader.read_line().await.unwrap(),
            Some("world".to_string())
        );
    }

    #[tokio::test]
    async fn test_control_bytes_survive_decode() {
        let mock = tokio_test::io::Builder::new()
            .read(b"25100\x01\x01\n")
            .build();
        let mut reader = LineStreamReader::new(mock, TEST_TIMEOUT);

        let line = reader.read_line().await.unwrap().unwrap();
        assert_eq!(line, "25100\u{1}\u{1}");
    }

    #[tokio::test]
    async fn test_survives_timeout_and_keeps_buffer() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut reader = LineStreamReader::new(rx, TEST_TIMEOUT);

        tx.write_all(b"par").await.unwrap();
        // Partial data buffered, then a timeout on the next call.
        assert_eq!(reader.read_line().await.unwrap(), None);
        assert_eq!(reader.read_line().await.unwrap(), None);

        // The reader must still be usable after timing out.
        tx.write_all(b"tial\n").await.unwrap();
        assert_eq!(
            reader.read_line().await.unwrap(),
            Some("partial".to_string())
        );
    }

    #[tokio::test]
    async fn test_peer_close_is_an_error() {
        let (tx, rx) = tokio::io::duplex(256);
        let mut reader = LineStreamReader::new(rx, TEST_TIMEOUT);

        drop(tx);
        match reader.read_line().await {
            Err(ReadError::Closed) => {}
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_permissive_high_bytes() {
        assert_eq!(decode_permissive(&[0xe9, 0x01]), "\u{e9}\u{1}");
    }
}
