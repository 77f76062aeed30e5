//! Upgraded connections and their lifecycle tracking.
//!
//! # Responsibilities
//! - Wrap an upgraded websocket so it can be closed exactly once
//! - Track connection state (Upgraded → Subscribing → Closing → Closed)
//! - Generate unique connection IDs for tracing
//! - Count in-flight connections so shutdown can drain them

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::SinkExt;
use tokio::sync::watch;

use crate::subscriber::SubscribeError;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// How long to wait for the peer to answer our close frame.
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake complete, socket owned by the handler.
    Upgraded,
    /// Socket lent to the subscriber.
    Subscribing,
    /// Subscriber returned; close handshake in progress.
    Closing,
    /// Socket closed.
    Closed,
}

/// An upgraded websocket owned by the upgrade handler.
///
/// Subscribers borrow it mutably. Whatever they do, the handler calls
/// [`Connection::finish`] afterwards, which sends a close frame only if no
/// close handshake has happened yet.
pub struct Connection {
    socket: WebSocket,
    id: ConnectionId,
    peer: SocketAddr,
    state: ConnectionState,
    closed: bool,
}

impl Connection {
    /// Wrap a socket whose handshake has completed.
    pub(crate) fn new(socket: WebSocket, id: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            socket,
            id,
            peer,
            state: ConnectionState::Upgraded,
            closed: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True once a close frame was sent or received, or the stream ended.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn transition(&mut self, next: ConnectionState) {
        tracing::trace!(
            connection_id = %self.id,
            from = ?self.state,
            to = ?next,
            "Connection state change"
        );
        self.state = next;
    }

    /// Receive the next data or control frame.
    ///
    /// A close frame from the peer is reported as [`SubscribeError::Closed`]
    /// with the peer's status; a stream that ends without one is reported as
    /// an abnormal closure (1006).
    pub async fn recv(&mut self) -> Result<Message, SubscribeError> {
        if self.closed {
            return Err(SubscribeError::AlreadyClosed);
        }

        match self.socket.recv().await {
            Some(Ok(Message::Close(frame))) => {
                self.closed = true;
                let (code, reason) = match frame {
                    Some(frame) => (frame.code, frame.reason.as_str().to_owned()),
                    None => (close_code::STATUS, String::new()),
                };
                Err(SubscribeError::Closed { code, reason })
            }
            Some(Ok(msg)) => Ok(msg),
            Some(Err(e)) => {
                self.closed = true;
                Err(SubscribeError::Transport(e))
            }
            None => {
                self.closed = true;
                Err(SubscribeError::Closed {
                    code: close_code::ABNORMAL,
                    reason: String::new(),
                })
            }
        }
    }

    pub async fn send(&mut self, msg: Message) -> Result<(), SubscribeError> {
        if self.closed {
            return Err(SubscribeError::AlreadyClosed);
        }
        self.socket.send(msg).await.map_err(SubscribeError::Transport)
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), SubscribeError> {
        let text: String = text.into();
        self.send(Message::Text(text.into())).await
    }

    /// Start the close handshake and wait (bounded) for the peer's answer.
    ///
    /// No-op if the connection is already closed.
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<(), SubscribeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        tracing::debug!(connection_id = %self.id, code, reason, "Sending close frame");
        self.socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_owned().into(),
            })))
            .await
            .map_err(SubscribeError::Transport)?;

        let drained = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
            while let Some(Ok(msg)) = self.socket.recv().await {
                if matches!(msg, Message::Close(_)) {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!(connection_id = %self.id, "Peer did not answer close frame");
        }
        Ok(())
    }

    /// Close with `fallback_code` unless already closed, then release the socket.
    pub(crate) async fn finish(mut self, fallback_code: u16) {
        self.transition(ConnectionState::Closing);

        if let Err(e) = self.close(fallback_code, "").await {
            tracing::debug!(connection_id = %self.id, error = %e, "Close frame not delivered");
        }
        // Flushes a pending close reply when the peer started the handshake.
        let _ = SinkExt::close(&mut self.socket).await;

        self.transition(ConnectionState::Closed);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Tracks in-flight connections for graceful shutdown.
///
/// The count lives in a watch channel so shutdown can wait for it to reach
/// zero without polling.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.send_modify(|n| *n += 1);
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until every tracked connection has been released.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped, including on panic.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}
