//! Realtime Channel
//!
//! Connectionless datagram channel for handshakes, per-tick entity
//! publishes, and server-pushed broadcasts. Outbound datagrams use the same
//! `[opcode u8][length u32 LE][payload]` framing as the control channel;
//! inbound datagrams are bare payloads delimited by datagram boundaries.
//!
//! Each lobby/match binding uses a freshly bound socket: the server learns
//! the return address from the handshake request itself, so the first
//! datagram a new socket can receive is the handshake response. Loss and
//! reordering are normal here and mean at worst a stale update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::debug;

use crate::network::control::ChannelError;
use crate::network::protocol::RealtimeOp;

/// Largest datagram we accept.
const MAX_DATAGRAM_BYTES: usize = 64 * 1024;

/// Result of waiting for one inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    /// One broadcast payload arrived.
    Datagram(Vec<u8>),
    /// The channel was closed locally; the receive loop should end.
    Closed,
}

/// Datagram channel bound to one lobby or match.
///
/// Cheap to clone; clones share the socket and the shutdown signal, which
/// lets a spawned receive loop outlive the owning session object's borrow.
#[derive(Debug, Clone)]
pub struct RealtimeChannel {
    socket: Arc<UdpSocket>,
    timeout: Duration,
    shutdown: broadcast::Sender<()>,
    closed: Arc<AtomicBool>,
}

impl RealtimeChannel {
    /// Bind a fresh local socket and direct it at `host:port`.
    pub async fn bind(host: &str, port: u16, timeout: Duration) -> Result<Self, ChannelError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((host, port)).await?;
        let local = socket.local_addr().ok();
        debug!(?local, remote = %format!("{host}:{port}"), "realtime channel bound");
        let (shutdown, _) = broadcast::channel(1);
        Ok(Self {
            socket: Arc::new(socket),
            timeout,
            shutdown,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Send one request datagram and wait for the response datagram.
    ///
    /// Valid only on a socket that has not completed its binding handshake
    /// yet; afterwards inbound datagrams belong to the receive loop.
    pub async fn request(&self, op: RealtimeOp, payload: &[u8]) -> Result<Vec<u8>, ChannelError> {
        self.send_frame(op, payload).await?;
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        let len = tokio::time::timeout(self.timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| ChannelError::Timeout(self.timeout))??;
        buf.truncate(len);
        Ok(buf)
    }

    /// Fire-and-forget publish. No response is expected or waited for.
    pub async fn publish(&self, op: RealtimeOp, payload: &[u8]) -> Result<(), ChannelError> {
        self.send_frame(op, payload).await
    }

    /// Obtain a shutdown receiver for a receive loop.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Wait for the next inbound datagram or a local close, whichever comes
    /// first. Never blocks past `close`.
    pub async fn next_datagram(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<RecvOutcome, ChannelError> {
        // Covers a close that happened before this receiver subscribed.
        if self.closed.load(Ordering::SeqCst) {
            return Ok(RecvOutcome::Closed);
        }
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        tokio::select! {
            received = self.socket.recv(&mut buf) => {
                let len = received?;
                buf.truncate(len);
                Ok(RecvOutcome::Datagram(buf))
            }
            _ = shutdown.recv() => Ok(RecvOutcome::Closed),
        }
    }

    /// Close the channel. Pending and future receives complete with
    /// [`RecvOutcome::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // No receiver just means no receive loop is running.
        let _ = self.shutdown.send(());
    }

    async fn send_frame(&self, op: RealtimeOp, payload: &[u8]) -> Result<(), ChannelError> {
        if payload.len() + 5 > MAX_DATAGRAM_BYTES {
            return Err(ChannelError::Framing(format!(
                "outbound datagram of {} bytes exceeds limit {MAX_DATAGRAM_BYTES}",
                payload.len() + 5
            )));
        }
        let mut frame = Vec::with_capacity(5 + payload.len());
        frame.push(op as u8);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        self.socket.send(&frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Loopback peer socket; returns it plus a channel aimed at it.
    async fn loopback_pair() -> (UdpSocket, RealtimeChannel) {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = peer.local_addr().unwrap().port();
        let channel = RealtimeChannel::bind("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        (peer, channel)
    }

    #[tokio::test]
    async fn test_request_roundtrip() {
        let (peer, channel) = loopback_pair().await;

        let server = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (len, from) = peer.recv_from(&mut buf).await.unwrap();
            assert_eq!(buf[0], RealtimeOp::ConnectLobby as u8);
            let payload_len = u32::from_le_bytes(buf[1..5].try_into().unwrap()) as usize;
            assert_eq!(&buf[5..len], b"ident");
            assert_eq!(payload_len, len - 5);
            peer.send_to(b"ok", from).await.unwrap();
        });

        let response = channel
            .request(RealtimeOp::ConnectLobby, b"ident")
            .await
            .unwrap();
        assert_eq!(response, b"ok");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_times_out_without_response() {
        let (_peer, channel) = loopback_pair().await;
        let channel = RealtimeChannel {
            timeout: Duration::from_millis(50),
            ..channel
        };
        let err = channel
            .request(RealtimeOp::ConnectGame, b"ident")
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_close_completes_pending_receive() {
        let (_peer, channel) = loopback_pair().await;

        let mut shutdown = channel.subscribe_shutdown();
        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.next_datagram(&mut shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.close();

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome, RecvOutcome::Closed);
    }

    #[tokio::test]
    async fn test_close_before_receive_is_not_missed() {
        let (_peer, channel) = loopback_pair().await;

        channel.close();
        let mut shutdown = channel.subscribe_shutdown();
        let outcome = channel.next_datagram(&mut shutdown).await.unwrap();
        assert_eq!(outcome, RecvOutcome::Closed);
    }

    #[tokio::test]
    async fn test_broadcast_datagram_is_delivered_raw() {
        let (peer, channel) = loopback_pair().await;

        // Force the server to learn our address the way a handshake would.
        let server = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (_, from) = peer.recv_from(&mut buf).await.unwrap();
            peer.send_to(b"ok", from).await.unwrap();
            peer.send_to(b"broadcast-bytes", from).await.unwrap();
        });
        channel
            .request(RealtimeOp::ConnectLobby, b"ident")
            .await
            .unwrap();

        let mut shutdown = channel.subscribe_shutdown();
        let outcome = channel.next_datagram(&mut shutdown).await.unwrap();
        assert_eq!(outcome, RecvOutcome::Datagram(b"broadcast-bytes".to_vec()));
        server.await.unwrap();
    }
}
