//! Control Channel
//!
//! Reliable TCP request/response channel for session management calls.
//! Requests are framed as `[opcode u8][length u32 LE][payload]`, responses
//! as `[length u32 LE][payload]`. Calls are strictly sequential: one
//! request, one response, in order.
//!
//! A framing violation (oversized length, connection dying mid-frame) means
//! the byte stream can no longer be trusted; the channel poisons itself and
//! fails every later call without touching the socket.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::network::protocol::ControlOp;

/// Upper bound on a single payload, both directions.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Transport and framing failures on either channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying socket failed. The call may be retried.
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),
    /// The byte stream violated the framing contract. Fatal for the channel.
    #[error("framing violation: {0}")]
    Framing(String),
    /// An earlier framing violation already poisoned this channel.
    #[error("channel poisoned by earlier framing violation")]
    Poisoned,
    /// No response arrived within the configured deadline.
    #[error("timed out after {0:?} waiting for response")]
    Timeout(Duration),
    /// The peer closed the channel cleanly.
    #[error("channel closed by peer")]
    Closed,
}

/// Reliable request/response channel to the server.
///
/// Connects lazily on the first call and reconnects after a transport
/// failure or timeout. Once poisoned it stays poisoned.
#[derive(Debug)]
pub struct ControlChannel {
    addr: String,
    timeout: Duration,
    stream: Option<TcpStream>,
    poisoned: bool,
}

impl ControlChannel {
    /// Create a channel for `host:port`. No connection is made yet.
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            timeout,
            stream: None,
            poisoned: false,
        }
    }

    /// Whether an earlier framing violation has disabled this channel.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Issue one call and wait for its response payload.
    ///
    /// Transport failures and timeouts drop the connection so the next call
    /// reconnects; a late response on a kept socket would desync every
    /// frame after it. Framing violations poison the channel instead.
    pub async fn call(&mut self, op: ControlOp, payload: &[u8]) -> Result<Vec<u8>, ChannelError> {
        if self.poisoned {
            return Err(ChannelError::Poisoned);
        }
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(ChannelError::Framing(format!(
                "request payload of {} bytes exceeds limit {MAX_PAYLOAD_BYTES}",
                payload.len()
            )));
        }

        match tokio::time::timeout(self.timeout, self.exchange(op, payload)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                self.stream = None;
                if matches!(err, ChannelError::Framing(_)) {
                    warn!(op = ?op, error = %err, "control channel poisoned");
                    self.poisoned = true;
                }
                Err(err)
            }
            Err(_) => {
                self.stream = None;
                Err(ChannelError::Timeout(self.timeout))
            }
        }
    }

    /// Issue a call whose response carries no payload (logout).
    pub async fn call_no_response(
        &mut self,
        op: ControlOp,
        payload: &[u8],
    ) -> Result<(), ChannelError> {
        let response = self.call(op, payload).await?;
        if !response.is_empty() {
            warn!(op = ?op, len = response.len(), "unexpected payload on empty response");
        }
        Ok(())
    }

    /// Drop the connection. The next call reconnects.
    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    async fn exchange(&mut self, op: ControlOp, payload: &[u8]) -> Result<Vec<u8>, ChannelError> {
        if self.stream.is_none() {
            debug!(addr = %self.addr, "connecting control channel");
            let stream = TcpStream::connect(&self.addr).await?;
            stream.set_nodelay(true)?;
            self.stream = Some(stream);
        }
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;

        // Header and payload go out in one write.
        let mut frame = Vec::with_capacity(5 + payload.len());
        frame.push(op as u8);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        stream.write_all(&frame).await?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                // Clean close between frames.
                ChannelError::Closed
            } else {
                ChannelError::Transport(e)
            }
        })?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_PAYLOAD_BYTES {
            return Err(ChannelError::Framing(format!(
                "response length {len} exceeds limit {MAX_PAYLOAD_BYTES}"
            )));
        }

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ChannelError::Framing(format!("stream ended inside a {len}-byte frame body"))
            } else {
                ChannelError::Transport(e)
            }
        })?;
        Ok(body)
    }
}
