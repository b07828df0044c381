//! Async facade over the blocking SQLite store.
//!
//! Every call runs on the blocking pool and is bounded by the configured
//! store timeout; a timeout surfaces as [`ServerError::Transport`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use parley_shared::{Message, MessageId, UserId, UserProfile};
use parley_store::{Database, NewMessage, PeerList, SeenUpdate};

use crate::error::ServerError;

#[derive(Clone)]
pub struct MessageRepository {
    db: Arc<Mutex<Database>>,
    timeout: Duration,
}

impl MessageRepository {
    pub fn new(db: Database, timeout: Duration) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            timeout,
        }
    }

    pub async fn create(&self, new: NewMessage) -> Result<Message, ServerError> {
        self.run("create_message", move |db| db.insert_message(&new))
            .await
    }

    pub async fn open_conversation(
        &self,
        reader: &UserId,
        peer: &UserId,
    ) -> Result<Vec<Message>, ServerError> {
        let (reader, peer) = (reader.clone(), peer.clone());
        self.run("open_conversation", move |db| {
            db.open_conversation(&reader, &peer)
        })
        .await
    }

    pub async fn list_peers(&self, user: &UserId) -> Result<PeerList, ServerError> {
        let user = user.clone();
        self.run("list_peers", move |db| db.list_peers(&user)).await
    }

    pub async fn mark_seen(&self, id: MessageId) -> Result<SeenUpdate, ServerError> {
        self.run("mark_seen", move |db| db.mark_seen(id))
            .await
            .map_err(|e| e.not_found_as("Message not found"))
    }

    pub async fn get_user(&self, id: &UserId) -> Result<UserProfile, ServerError> {
        let id = id.clone();
        self.run("get_user", move |db| db.get_user(&id))
            .await
            .map_err(|e| e.not_found_as("User not found"))
    }

    pub async fn upsert_user(&self, profile: UserProfile) -> Result<UserProfile, ServerError> {
        self.run("upsert_user", move |db| {
            db.upsert_user(&profile)?;
            Ok(profile)
        })
        .await
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, ServerError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> parley_store::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || {
            // Poisoning does not invalidate the connection.
            let guard = db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&*guard).map_err(ServerError::from)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ServerError::Transport(format!(
                "{op} task failed: {join_err}"
            ))),
            Err(_) => {
                warn!(
                    op,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Store operation timed out"
                );
                Err(ServerError::Transport(format!("{op} timed out")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::MessagePayload;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn repo(timeout: Duration) -> MessageRepository {
        MessageRepository::new(Database::open_in_memory().unwrap(), timeout)
    }

    #[tokio::test]
    async fn create_then_open() {
        let repo = repo(Duration::from_secs(5));
        let new = NewMessage::new(uid("alice"), uid("bob"), MessagePayload::text("hi")).unwrap();

        let stored = repo.create(new).await.unwrap();
        let listed = repo.open_conversation(&uid("bob"), &uid("alice")).await.unwrap();
        assert_eq!(listed, vec![stored]);

        let reopened = repo.open_conversation(&uid("bob"), &uid("alice")).await.unwrap();
        assert!(reopened[0].seen);
    }

    #[tokio::test]
    async fn unknown_records_name_what_is_missing() {
        let repo = repo(Duration::from_secs(5));

        let err = repo.mark_seen(MessageId::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Message not found");

        let err = repo.get_user(&uid("nobody")).await.unwrap_err();
        assert_eq!(err.to_string(), "User not found");
    }

    #[tokio::test]
    async fn slow_store_times_out_as_transport_error() {
        let repo = repo(Duration::from_millis(50));

        // Hold the lock so the store call cannot start in time.
        let db = repo.db.clone();
        let blocker = std::thread::spawn(move || {
            let _guard = db.lock().unwrap();
            std::thread::sleep(Duration::from_millis(300));
        });
        std::thread::sleep(Duration::from_millis(20));

        let result = repo.list_peers(&uid("alice")).await;
        assert!(matches!(result, Err(ServerError::Transport(_))));

        blocker.join().unwrap();
    }
}
