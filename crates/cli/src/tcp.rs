//! Newline-delimited JSON envelopes over TCP.

use async_trait::async_trait;
use protocol::{Envelope, SwapError, Transport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tracing::debug;

pub struct TcpTransport {
    reader: Mutex<Lines<BufReader<OwnedReadHalf>>>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpTransport {
    /// # Errors
    /// Returns `SwapError::Transport` if the peer cannot be reached.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, SwapError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| SwapError::Transport(format!("connect failed: {e}")))?;
        Ok(Self::new(stream))
    }

    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: Mutex::new(BufReader::new(read).lines()),
            writer: Mutex::new(write),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), SwapError> {
        let mut line = serde_json::to_vec(&envelope)
            .map_err(|e| SwapError::Transport(format!("encode failed: {e}")))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| SwapError::Transport(format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| SwapError::Transport(format!("write failed: {e}")))
    }

    async fn recv(&self) -> Result<Envelope, SwapError> {
        let mut reader = self.reader.lock().await;
        loop {
            let line = reader
                .next_line()
                .await
                .map_err(|e| SwapError::Transport(format!("read failed: {e}")))?
                .ok_or_else(|| SwapError::Transport("peer closed the connection".into()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(envelope) => return Ok(envelope),
                Err(e) => debug!(error = %e, "Dropping undecodable line"),
            }
        }
    }
}
