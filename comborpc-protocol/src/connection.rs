//! A single framed exchange over one TCP stream.

use crate::error::ProtocolError;
use crate::frame::{read_frame, write_frame};
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

/// Default deadline for one exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeouts below this are replaced by [`DEFAULT_TIMEOUT`].
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Returns `timeout`, or the default when it is below [`MIN_TIMEOUT`].
pub fn normalize_timeout(timeout: Duration) -> Duration {
    if timeout < MIN_TIMEOUT {
        DEFAULT_TIMEOUT
    } else {
        timeout
    }
}

/// Stand-in deadline for timeouts too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Absolute deadline `timeout` from now, saturating instead of overflowing.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

/// One live stream socket with an absolute deadline.
///
/// Every send and receive is bounded by the deadline fixed when the connection was
/// dialed or accepted. A connection is used for exactly one request/response
/// exchange and is never shared between concurrent operations.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    deadline: Instant,
}

impl Connection {
    /// Dials `endpoint`. The deadline covers the dial and every later read and write.
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self, ProtocolError> {
        let deadline = deadline_after(timeout);
        tracing::debug!("Connecting to {}...", endpoint);

        let stream = timeout_at(deadline, TcpStream::connect(endpoint))
            .await
            .map_err(|_| {
                tracing::debug!("Connection to {} timed out", endpoint);
                ProtocolError::Timeout
            })?
            .map_err(|e| {
                tracing::debug!("Connection to {} failed: {}", endpoint, e);
                ProtocolError::Io(e)
            })?;

        stream.set_nodelay(true).ok();
        Self::from_stream(stream, deadline)
    }

    /// Wraps an already connected stream (e.g. one returned by `accept`).
    pub fn from_stream(stream: TcpStream, deadline: Instant) -> Result<Self, ProtocolError> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        Ok(Self {
            stream: Some(stream),
            peer_addr,
            local_addr,
            deadline,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Sends one frame.
    pub async fn send(&mut self, body: &[u8]) -> Result<(), ProtocolError> {
        self.check_deadline()?;
        let stream = self
            .stream
            .as_mut()
            .ok_or(ProtocolError::ConnectionClosed)?;
        timeout_at(self.deadline, write_frame(stream, body))
            .await
            .map_err(|_| ProtocolError::Timeout)??;
        tracing::debug!("[{}] Sent frame ({} bytes)", self.peer_addr, body.len());
        Ok(())
    }

    /// Receives one frame and returns its body.
    pub async fn receive(&mut self) -> Result<Bytes, ProtocolError> {
        self.check_deadline()?;
        let stream = self
            .stream
            .as_mut()
            .ok_or(ProtocolError::ConnectionClosed)?;
        let body = timeout_at(self.deadline, read_frame(stream))
            .await
            .map_err(|_| ProtocolError::Timeout)??;
        tracing::debug!("[{}] Received frame ({} bytes)", self.peer_addr, body.len());
        Ok(body)
    }

    // timeout_at polls the inner future before the timer; an expired deadline must still fail.
    fn check_deadline(&self) -> Result<(), ProtocolError> {
        if Instant::now() >= self.deadline {
            return Err(ProtocolError::Timeout);
        }
        Ok(())
    }

    /// Shuts down and releases the socket. Calling it again is a no-op.
    ///
    /// Close-time errors are logged, not returned.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!("[{}] Error while closing connection: {}", self.peer_addr, e);
            }
        }
    }
}
