//! Serial transport abstraction
//!
//! The engine owns the port exclusively and is its only writer. The trait
//! keeps the engine testable: production uses [`SerialTransport`] over
//! tokio-serial, tests use the channel-backed [`MockLink`].

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

/// Byte-level link to the modem.
#[async_trait]
pub trait SerialLink: Send + 'static {
    /// Write bytes to the modem.
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Wait for the next inbound chunk. An empty chunk is not an error.
    async fn read(&mut self) -> io::Result<Bytes>;
}

/// Production transport over a UART device (8-N-1).
pub struct SerialTransport {
    stream: SerialStream,
    read_buf: Vec<u8>,
}

impl SerialTransport {
    /// Open `path` at `baud`, 8 data bits, no parity, one stop bit.
    pub fn open(path: &str, baud: u32) -> io::Result<Self> {
        let stream = tokio_serial::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        tracing::info!(device = path, baud, "serial port opened");
        Ok(Self {
            stream,
            read_buf: vec![0u8; 512],
        })
    }
}

#[async_trait]
impl SerialLink for SerialTransport {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    async fn read(&mut self) -> io::Result<Bytes> {
        let n = self.stream.read(&mut self.read_buf).await?;
        Ok(Bytes::copy_from_slice(&self.read_buf[..n]))
    }
}

/// Channel-backed link for tests: the test plays the modem's side.
pub struct MockLink {
    incoming: mpsc::UnboundedReceiver<Bytes>,
    outgoing: mpsc::UnboundedSender<Bytes>,
}

/// The modem side of a [`MockLink`] pair.
pub struct MockHandle {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MockLink {
    /// Create a connected link/handle pair.
    pub fn pair() -> (MockLink, MockHandle) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            MockLink {
                incoming: in_rx,
                outgoing: out_tx,
            },
            MockHandle {
                tx: in_tx,
                rx: out_rx,
            },
        )
    }
}

#[async_trait]
impl SerialLink for MockLink {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.outgoing
            .send(Bytes::copy_from_slice(data))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "mock handle dropped"))
    }

    async fn read(&mut self) -> io::Result<Bytes> {
        self.incoming
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "mock handle dropped"))
    }
}

impl MockHandle {
    /// Push bytes the "modem" sends to the host.
    pub fn feed(&self, data: &[u8]) {
        let _ = self.tx.send(Bytes::copy_from_slice(data));
    }

    /// Next write the host issued, as raw bytes.
    pub async fn written(&mut self) -> Vec<u8> {
        self.rx.recv().await.map(|b| b.to_vec()).unwrap_or_default()
    }

    /// Non-blocking variant of [`written`](Self::written).
    pub fn try_written(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok().map(|b| b.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_pair_round_trip() {
        let (mut link, mut handle) = MockLink::pair();

        link.write(b"AT\r").await.unwrap();
        assert_eq!(handle.written().await, b"AT\r".to_vec());

        handle.feed(b"\r\nOK\r\n");
        assert_eq!(link.read().await.unwrap(), Bytes::from_static(b"\r\nOK\r\n"));
    }

    #[tokio::test]
    async fn test_mock_read_fails_after_handle_drop() {
        let (mut link, handle) = MockLink::pair();
        drop(handle);
        assert!(link.read().await.is_err());
    }
}
