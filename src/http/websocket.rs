//! WebSocket upgrade handling.
//!
//! # Responsibilities
//! - Complete the upgrade handshake with the client
//! - Hand the upgraded connection to the subscriber
//! - Classify how the subscription ended and log it
//! - Close the connection on every exit path
//!
//! # Data Flow
//! ```text
//! GET /ws → ws_handler (upgrade or log rejection)
//!         → serve_connection (one task per connection)
//!             → Subscriber::subscribe(cancel, &mut conn)
//!             → Outcome::classify → log
//!             → Connection::finish (close 1011 unless already closed)
//! ```
//!
//! # Design Decisions
//! - The handler owns the connection; the subscriber only borrows it
//! - Subscriber panics are caught so the close still runs
//! - Outcome only affects logging, never whether the connection is closed

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{instrument::WithSubscriber, Dispatch, Level};

use crate::net::{
    Connection, ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker,
};
use crate::subscriber::{Outcome, Subscriber};

/// Everything the upgrade route needs, shared by all connections.
#[derive(Clone)]
pub(crate) struct WsState {
    pub subscriber: Arc<dyn Subscriber>,
    /// Parent of every per-connection token.
    pub base: CancellationToken,
    pub tracker: ConnectionTracker,
    pub dispatch: Dispatch,
}

/// Upgrade handler for `/ws`.
pub(crate) async fn ws_handler(
    State(state): State<WsState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!(peer = %peer, error = %rejection, "websocket upgrade failed");
            return rejection.into_response();
        }
    };

    // Counted from here so shutdown also waits for handshakes in progress.
    let guard = state.tracker.track();
    let failed_dispatch = state.dispatch.clone();
    let dispatch = state.dispatch.clone();

    ws.on_failed_upgrade(move |err| {
        tracing::dispatcher::with_default(&failed_dispatch, || {
            tracing::warn!(peer = %peer, error = %err, "websocket upgrade failed");
        });
    })
    .on_upgrade(move |socket| serve_connection(socket, peer, guard, state).with_subscriber(dispatch))
}

/// Runs one subscription to completion and closes the connection.
async fn serve_connection(
    socket: WebSocket,
    peer: SocketAddr,
    guard: ConnectionGuard,
    state: WsState,
) {
    let mut conn = Connection::new(socket, guard.id(), peer);
    let cancel = state.base.child_token();
    // Stops anything the subscriber spawned with this token once we return.
    let _cancel_on_exit = cancel.clone().drop_guard();

    tracing::debug!(connection_id = %conn.id(), peer = %peer, "websocket connected");

    conn.transition(ConnectionState::Subscribing);
    let result = AssertUnwindSafe(state.subscriber.subscribe(cancel, &mut conn))
        .catch_unwind()
        .await;

    let outcome = match result {
        Ok(result) => Outcome::classify(&result),
        Err(panic) => Outcome::Failed(format!("subscriber panicked: {}", panic_message(&*panic))),
    };
    log_outcome(conn.id(), peer, &outcome);

    conn.finish(close_code::ERROR).await;
    drop(guard);
}

/// Logs `outcome` at the level it classifies itself as.
fn log_outcome(id: ConnectionId, peer: SocketAddr, outcome: &Outcome) {
    match outcome.level() {
        Level::ERROR => tracing::error!(
            connection_id = %id,
            peer = %peer,
            outcome = %outcome,
            "websocket subscriber failed"
        ),
        Level::INFO => tracing::info!(
            connection_id = %id,
            peer = %peer,
            outcome = %outcome,
            "websocket subscriber disconnected"
        ),
        _ => tracing::debug!(
            connection_id = %id,
            peer = %peer,
            outcome = %outcome,
            "websocket subscriber returned"
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        *msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn logged(outcome: &Outcome) -> String {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_ansi(false)
            .without_time()
            .with_writer(move || writer.clone())
            .finish();

        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        tracing::subscriber::with_default(subscriber, || {
            log_outcome(ConnectionId::new(), peer, outcome)
        });
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn outcome_logged_at_its_own_level() {
        for outcome in [
            Outcome::Completed,
            Outcome::Normal,
            Outcome::GoingAway,
            Outcome::Cancelled,
            Outcome::Failed("disk full".into()),
        ] {
            let line = logged(&outcome);
            let level = outcome.level().to_string();
            assert!(
                line.trim_start().starts_with(&level),
                "{outcome} should log at {level}: {line}"
            );
            assert!(line.contains(&outcome.to_string()), "{line}");
        }
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let static_payload: Box<dyn Any + Send> = Box::new("static boom");
        assert_eq!(panic_message(&*static_payload), "static boom");

        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(&*owned_payload), "owned boom");

        let other_payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(&*other_payload), "non-string panic payload");
    }
}
