//! Per-connection outbound event queues.
//!
//! Every live socket attaches to the [`RealtimeChannel`] and receives a
//! bounded queue. Events are pushed with `try_send`, so a stalled client
//! never blocks a request handler; its events are dropped instead.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use parley_shared::ServerEvent;

/// Capacity of each connection's outbound queue.
const OUTBOUND_QUEUE: usize = 256;

/// Identifies one live socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection {0} is not attached")]
    ConnectionGone(ConnectionId),

    #[error("outbound queue of connection {0} is full")]
    QueueFull(ConnectionId),
}

#[derive(Clone, Default)]
pub struct RealtimeChannel {
    senders: Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>>,
}

impl RealtimeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection. Events emitted to it arrive on the returned
    /// receiver in emission order.
    pub async fn attach(&self, connection: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let mut senders = self.senders.write().await;
        senders.insert(connection, tx);

        info!(
            connection = %connection,
            connections = senders.len(),
            "Connection attached"
        );

        rx
    }

    /// Detach a connection. Its receiver observes end-of-stream once drained.
    pub async fn detach(&self, connection: &ConnectionId) -> bool {
        let mut senders = self.senders.write().await;
        let removed = senders.remove(connection).is_some();

        if removed {
            info!(
                connection = %connection,
                connections = senders.len(),
                "Connection detached"
            );
        }

        removed
    }

    /// Queue an event for a single connection.
    pub async fn emit_to(
        &self,
        connection: &ConnectionId,
        event: ServerEvent,
    ) -> Result<(), DeliveryError> {
        let senders = self.senders.read().await;
        let tx = senders
            .get(connection)
            .ok_or(DeliveryError::ConnectionGone(*connection))?;

        tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull(*connection),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::ConnectionGone(*connection),
        })
    }

    /// Queue an event for every attached connection. Returns how many
    /// connections accepted it.
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        let senders = self.senders.read().await;
        let mut delivered = 0;

        for (connection, tx) in senders.iter() {
            if tx.try_send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(
                    connection = %connection,
                    event = event.kind().as_str(),
                    "Dropping event for slow connection"
                );
            }
        }

        delivered
    }

    pub async fn connection_count(&self) -> usize {
        self.senders.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::UserId;

    fn online(ids: &[&str]) -> ServerEvent {
        ServerEvent::OnlineUsers(ids.iter().map(|s| UserId::parse(s).unwrap()).collect())
    }

    #[tokio::test]
    async fn emit_preserves_order() {
        let channel = RealtimeChannel::new();
        let conn = ConnectionId::new();
        let mut rx = channel.attach(conn).await;

        channel.emit_to(&conn, online(&["a"])).await.unwrap();
        channel.emit_to(&conn, online(&["a", "b"])).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), online(&["a"]));
        assert_eq!(rx.recv().await.unwrap(), online(&["a", "b"]));
    }

    #[tokio::test]
    async fn emit_to_unknown_connection_fails() {
        let channel = RealtimeChannel::new();
        let conn = ConnectionId::new();

        assert_eq!(
            channel.emit_to(&conn, online(&[])).await,
            Err(DeliveryError::ConnectionGone(conn))
        );
    }

    #[tokio::test]
    async fn full_queue_reports_instead_of_blocking() {
        let channel = RealtimeChannel::new();
        let conn = ConnectionId::new();
        let _rx = channel.attach(conn).await;

        for _ in 0..OUTBOUND_QUEUE {
            channel.emit_to(&conn, online(&[])).await.unwrap();
        }
        assert_eq!(
            channel.emit_to(&conn, online(&[])).await,
            Err(DeliveryError::QueueFull(conn))
        );
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let channel = RealtimeChannel::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let mut rx_a = channel.attach(a).await;
        let mut rx_b = channel.attach(b).await;

        assert_eq!(channel.broadcast(online(&["x"])).await, 2);
        assert_eq!(rx_a.recv().await.unwrap(), online(&["x"]));
        assert_eq!(rx_b.recv().await.unwrap(), online(&["x"]));

        assert!(channel.detach(&a).await);
        assert!(!channel.detach(&a).await);
        assert_eq!(channel.connection_count().await, 1);
        assert!(rx_a.recv().await.is_none());
    }
}
