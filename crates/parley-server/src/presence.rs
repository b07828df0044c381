//! Online-user registry.
//!
//! Maps each authenticated user to the socket connection that currently
//! represents them. Every change is announced to all connected sockets as a
//! `getOnlineUsers` snapshot; the broadcast happens while the registry lock
//! is held so snapshots reach clients in mutation order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use parley_shared::{ServerEvent, UserId};

use crate::realtime::{ConnectionId, RealtimeChannel};

#[derive(Clone)]
pub struct PresenceRegistry {
    online: Arc<RwLock<HashMap<UserId, ConnectionId>>>,
    channel: RealtimeChannel,
}

impl PresenceRegistry {
    pub fn new(channel: RealtimeChannel) -> Self {
        Self {
            online: Arc::new(RwLock::new(HashMap::new())),
            channel,
        }
    }

    /// Record `connection` as the live socket of `user`. A reconnect replaces
    /// the previous connection (latest wins).
    pub async fn register(&self, user: &UserId, connection: ConnectionId) {
        let mut online = self.online.write().await;
        let previous = online.insert(user.clone(), connection);

        info!(
            user = %user,
            connection = %connection,
            replaced = previous.is_some(),
            online = online.len(),
            "User online"
        );

        self.announce(&online).await;
    }

    /// Drop `user` regardless of which connection is registered.
    pub async fn unregister(&self, user: &UserId) -> bool {
        let mut online = self.online.write().await;
        let removed = online.remove(user).is_some();

        if removed {
            info!(user = %user, online = online.len(), "User offline");
        }
        self.announce(&online).await;

        removed
    }

    /// Drop `user` only if `connection` is still the registered one, so a
    /// stale socket closing after a reconnect leaves the new entry alone.
    pub async fn release(&self, user: &UserId, connection: ConnectionId) -> bool {
        let mut online = self.online.write().await;

        if online.get(user) != Some(&connection) {
            debug!(
                user = %user,
                connection = %connection,
                "Stale connection closed, keeping current registration"
            );
            return false;
        }

        online.remove(user);
        info!(user = %user, online = online.len(), "User offline");
        self.announce(&online).await;

        true
    }

    /// Snapshot of online user ids, sorted.
    pub async fn list_online(&self) -> Vec<UserId> {
        snapshot(&*self.online.read().await)
    }

    pub async fn connection_of(&self, user: &UserId) -> Option<ConnectionId> {
        self.online.read().await.get(user).copied()
    }

    async fn announce(&self, online: &HashMap<UserId, ConnectionId>) {
        let delivered = self
            .channel
            .broadcast(ServerEvent::OnlineUsers(snapshot(online)))
            .await;
        debug!(delivered, "Broadcast online users");
    }
}

fn snapshot(online: &HashMap<UserId, ConnectionId>) -> Vec<UserId> {
    let mut users: Vec<UserId> = online.keys().cloned().collect();
    users.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    users
}
