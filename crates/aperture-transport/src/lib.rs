//! Aperture transport crate - point-to-point push/pull messaging over TCP.
//!
//! Each pipeline link is one [`PushSocket`] (binds and listens) paired with
//! one [`PullSocket`] (connects). A message is an ordered sequence of byte
//! parts delivered as a unit: the frame is `u32 part-count`, then per part
//! `u32 length` + bytes, all little-endian. Within one link, part boundaries
//! and message order are preserved exactly.
//!
//! The channel is unacknowledged and single-producer single-consumer:
//! `send` enqueues without waiting for the receiver (messages queue until a
//! consumer connects), and `recv` blocks until a complete message arrives.
//! Neither side surfaces flow control: a slow or absent consumer is
//! invisible to the producer.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use aperture_core::{ApertureError, Result};

/// One multipart message: ordered, opaque byte parts.
pub type Message = Vec<Vec<u8>>;

/// Upper bound on a single part; larger frames are protocol errors.
pub const MAX_PART_LEN: usize = 64 * 1024 * 1024;

/// Upper bound on parts per message; the pipeline uses 2 and 3.
pub const MAX_PARTS: usize = 16;

const RECONNECT_DELAY: Duration = Duration::from_millis(500);

// =============================================================================
// Push side
// =============================================================================

/// Sending half of a link. Binds a TCP listener and serves exactly one
/// consumer at a time.
///
/// Messages enqueue on an unbounded channel and a background task drains
/// them to whichever consumer is connected. If the consumer is absent the
/// queue simply grows; if a write fails the in-flight message is dropped
/// and the task returns to accepting.
pub struct PushSocket {
    tx: mpsc::UnboundedSender<Message>,
    local_addr: SocketAddr,
}

impl PushSocket {
    /// Bind the listener and start the writer task.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApertureError::Transport(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ApertureError::Transport(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(push_loop(listener, rx));
        debug!(addr = %local_addr, "push socket bound");
        Ok(Self { tx, local_addr })
    }

    /// The bound address; useful when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Enqueue one message. Never blocks and never waits for the consumer.
    pub fn send(&self, parts: Message) -> Result<()> {
        if parts.is_empty() || parts.len() > MAX_PARTS {
            return Err(ApertureError::Transport(format!(
                "message must have 1..={} parts, got {}",
                MAX_PARTS,
                parts.len()
            )));
        }
        if let Some(p) = parts.iter().find(|p| p.len() > MAX_PART_LEN) {
            return Err(ApertureError::Transport(format!(
                "part of {} bytes exceeds the {} byte limit",
                p.len(),
                MAX_PART_LEN
            )));
        }
        self.tx
            .send(parts)
            .map_err(|_| ApertureError::Transport("push writer task has exited".to_string()))
    }
}

async fn push_loop(listener: TcpListener, mut rx: mpsc::UnboundedReceiver<Message>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        debug!(peer = %peer, "consumer connected");

        let mut writer = BufWriter::new(stream);
        loop {
            match rx.recv().await {
                Some(msg) => {
                    if let Err(e) = write_message(&mut writer, &msg).await {
                        // Unacknowledged channel: the in-flight message is
                        // gone, the rest of the queue waits for the next
                        // consumer.
                        warn!(error = %e, "write failed; awaiting reconnect");
                        break;
                    }
                }
                // Socket handle dropped and queue drained.
                None => return,
            }
        }
    }
}

// =============================================================================
// Pull side
// =============================================================================

/// Receiving half of a link. Connects to the producer's bound endpoint.
///
/// Connection is lazy and self-healing: the first `recv` dials the
/// producer, retrying until it is up, and a broken connection is re-dialed
/// transparently. The caller only ever observes complete messages.
pub struct PullSocket {
    addr: String,
    stream: Option<BufReader<TcpStream>>,
}

impl PullSocket {
    pub fn connect(addr: &str) -> Self {
        Self { addr: addr.to_string(), stream: None }
    }

    /// Block until the next complete message arrives.
    pub async fn recv(&mut self) -> Message {
        loop {
            if self.stream.is_none() {
                match TcpStream::connect(&self.addr).await {
                    Ok(s) => {
                        debug!(addr = %self.addr, "connected to producer");
                        self.stream = Some(BufReader::new(s));
                    }
                    Err(e) => {
                        debug!(addr = %self.addr, error = %e, "producer not reachable, retrying");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                }
            }
            let Some(reader) = self.stream.as_mut() else {
                continue;
            };

            match read_message(reader).await {
                Ok(msg) => return msg,
                Err(e) => {
                    warn!(addr = %self.addr, error = %e, "connection lost; reconnecting");
                    self.stream = None;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

// =============================================================================
// Framing
// =============================================================================

async fn write_message<W: AsyncWrite + Unpin>(w: &mut W, parts: &[Vec<u8>]) -> std::io::Result<()> {
    w.write_all(&(parts.len() as u32).to_le_bytes()).await?;
    for part in parts {
        w.write_all(&(part.len() as u32).to_le_bytes()).await?;
        w.write_all(part).await?;
    }
    w.flush().await
}

async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<Message> {
    let count = read_u32(r).await? as usize;
    if count == 0 || count > MAX_PARTS {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid part count {}", count),
        ));
    }

    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_u32(r).await? as usize;
        if len > MAX_PART_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("part length {} exceeds limit", len),
            ));
        }
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf).await?;
        parts.push(buf);
    }
    Ok(parts)
}

async fn read_u32<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).await?;
    Ok(u32::from_le_bytes(buf))
}
