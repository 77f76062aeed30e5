//! Reference subscriber that echoes data frames back to the peer.

use async_trait::async_trait;
use axum::extract::ws::{close_code, Message};
use tokio_util::sync::CancellationToken;

use super::{SubscribeError, Subscriber};
use crate::net::Connection;

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoSubscriber;

#[async_trait]
impl Subscriber for EchoSubscriber {
    async fn subscribe(
        &self,
        cancel: CancellationToken,
        conn: &mut Connection,
    ) -> Result<(), SubscribeError> {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => {
                    conn.close(close_code::AWAY, "server shutting down").await?;
                    return Err(SubscribeError::Cancelled);
                }
                msg = conn.recv() => msg?,
            };

            match msg {
                Message::Text(_) | Message::Binary(_) => conn.send(msg).await?,
                // Pings are answered by the websocket layer.
                _ => {}
            }
        }
    }
}
