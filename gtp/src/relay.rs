//! The relay client: owns the TCP connection to the relay, speaks its
//! plaintext handshake/listing/forwarding protocol, and exposes a stream
//! of inbound framed lines to the demultiplexer.

use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::GtpError;

/// End-of-payload sentinel appended to every forwarded MPC payload,
/// because the relay may concatenate sequentially sent payloads on a
/// single read.
pub const PAYLOAD_SENTINEL: &str = "||";

/// The relay's nickname prompt, read in full before a client may announce
/// itself.
const NICKNAME_PROMPT: &str = "Pick nickname: ";

/// Text the relay includes somewhere in its peer-listing response, which
/// must be filtered out of the returned roster.
const ROSTER_HEADER_MARKER: &str = "available connections";

/// Time `list_peers` spends draining the relay's response after asking
/// `print`, mirroring the fixed settle time the source waits.
const ROSTER_SETTLE: Duration = Duration::from_millis(1500);

const READ_CHUNK: usize = 4096;

/// Transport abstraction so the protocol/demux/coordinator layers run
/// identically over a real relay connection or an in-memory mock (see
/// `testing::MockRelay`).
#[async_trait(?Send)]
pub trait RelayTransport {
    /// Perform the relay's nickname handshake.
    async fn connect(&mut self, nickname: &str) -> Result<(), GtpError>;

    /// Forward `payload` (already wire-encoded, unframed) to `recipients`.
    async fn send(&mut self, recipients: &[String], payload: &str) -> Result<(), GtpError>;

    /// Query the relay's roster, with the header line filtered out. Any
    /// MPC-shaped frames that arrive while querying are salvaged rather
    /// than discarded; retrieve them with `drain_salvaged`.
    async fn list_peers(&mut self) -> Result<Vec<String>, GtpError>;

    /// Block until the next framed line is available or `deadline` elapses.
    /// Returns `Ok(None)` on timeout, never collapsing two frames into one.
    async fn receive(&mut self, deadline: Instant) -> Result<Option<String>, GtpError>;

    /// Drain frames salvaged during a `list_peers` call.
    fn drain_salvaged(&mut self) -> Vec<String>;

    /// Close the underlying connection.
    async fn close(&mut self);
}

/// Extract the next frame from `buffer`, preferring the `||` payload
/// sentinel and falling back to `\n` for relay chatter that never carries
/// one. Returns `None` if no full frame is present yet.
fn extract_frame(buffer: &mut String) -> Option<String> {
    if let Some(idx) = buffer.find(PAYLOAD_SENTINEL) {
        let raw = buffer[..idx].trim().to_string();
        *buffer = buffer[idx + PAYLOAD_SENTINEL.len()..].to_string();
        return Some(raw);
    }
    if let Some(idx) = buffer.find('\n') {
        let raw = buffer[..idx].trim().to_string();
        *buffer = buffer[idx + 1..].to_string();
        return Some(raw);
    }
    None
}

/// Relay client over a plain TCP socket.
pub struct TcpRelayClient {
    stream: TcpStream,
    buffer: String,
    salvaged: Vec<String>,
}

impl TcpRelayClient {
    pub async fn open(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            buffer: String::new(),
            salvaged: Vec::new(),
        })
    }

    async fn write_line(&mut self, line: &str) -> Result<(), GtpError> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read into `self.buffer` until `marker` is found, returning everything
    /// up to and including it; consumes nothing extra.
    async fn recv_until(&mut self, marker: &str) -> Result<String, GtpError> {
        loop {
            if let Some(idx) = self.buffer.find(marker) {
                let result = self.buffer[..idx + marker.len()].to_string();
                self.buffer = self.buffer[idx + marker.len()..].to_string();
                return Ok(result);
            }
            self.read_more().await?;
        }
    }

    async fn read_more(&mut self) -> Result<(), GtpError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(GtpError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "relay closed the connection",
            )));
        }
        self.buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
        Ok(())
    }

    async fn read_more_with_deadline(&mut self, deadline: Instant) -> Result<bool, GtpError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        match tokio::time::timeout(remaining, self.read_more()).await {
            Ok(result) => result.map(|_| true),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait(?Send)]
impl RelayTransport for TcpRelayClient {
    async fn connect(&mut self, nickname: &str) -> Result<(), GtpError> {
        let greeting = self.recv_until(NICKNAME_PROMPT).await?;
        if !greeting.ends_with(NICKNAME_PROMPT) {
            return Err(GtpError::Handshake(
                "relay closed before sending nickname prompt".to_string(),
            ));
        }
        self.write_line(&format!("{nickname}\n")).await?;

        // Drain whatever ack/welcome text follows; it's relay chatter, not
        // protocol-relevant, so we don't need to parse it.
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.read_more_with_deadline(deadline).await? {}
        self.buffer.clear();
        Ok(())
    }

    async fn send(&mut self, recipients: &[String], payload: &str) -> Result<(), GtpError> {
        let line = format!(
            "send {} {}{}\n",
            recipients.join(","),
            payload.trim(),
            PAYLOAD_SENTINEL
        );
        self.write_line(&line).await
    }

    async fn list_peers(&mut self) -> Result<Vec<String>, GtpError> {
        self.write_line("print\n").await?;

        let deadline = Instant::now() + ROSTER_SETTLE;
        let mut peers = Vec::new();
        loop {
            match extract_frame(&mut self.buffer) {
                Some(line) if line.is_empty() => continue,
                Some(line) if line.starts_with('{') => self.salvaged.push(line),
                Some(line) if line.contains(ROSTER_HEADER_MARKER) => {}
                Some(line) => peers.push(line),
                None => {
                    if !self.read_more_with_deadline(deadline).await? {
                        break;
                    }
                }
            }
        }
        Ok(peers)
    }

    async fn receive(&mut self, deadline: Instant) -> Result<Option<String>, GtpError> {
        loop {
            match extract_frame(&mut self.buffer) {
                Some(line) if line.is_empty() => continue,
                Some(line) => return Ok(Some(line)),
                None => {
                    if !self.read_more_with_deadline(deadline).await? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn drain_salvaged(&mut self) -> Vec<String> {
        std::mem::take(&mut self.salvaged)
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
