//! A signed-in chat session.
//!
//! [`ChatSession`] owns the [`ChatState`] and keeps it in sync with REST
//! responses and socket events. History responses that arrive after the
//! selection moved on are dropped, and the `newMessage` handler is replaced
//! (never stacked) on every selection change.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use parley_shared::protocol::ProfileUpdate;
use parley_shared::{EventKind, Message, MessageId, MessagePayload, ServerEvent, UserId, UserProfile};

use crate::api::ChatApi;
use crate::attachment;
use crate::error::ClientError;
use crate::events::{EventHandlers, HandlerId, Notifier};
use crate::state::{ChatState, Incoming};

pub struct ChatSession<A: ChatApi> {
    api: Arc<A>,
    state: Arc<Mutex<ChatState>>,
    handlers: Arc<EventHandlers>,
    notifier: Arc<dyn Notifier>,
    presence_handler: HandlerId,
    message_handler: Mutex<Option<HandlerId>>,
}

impl<A: ChatApi> ChatSession<A> {
    pub fn new(api: Arc<A>, handlers: Arc<EventHandlers>, notifier: Arc<dyn Notifier>) -> Self {
        let state = Arc::new(Mutex::new(ChatState::new()));

        let presence_state = state.clone();
        let presence_handler = handlers.subscribe(EventKind::OnlineUsers, move |event| {
            if let ServerEvent::OnlineUsers(users) = event {
                lock(&presence_state).set_online(users.clone());
                debug!(online = users.len(), "Online users updated");
            }
        });

        let session = Self {
            api,
            state,
            handlers,
            notifier,
            presence_handler,
            message_handler: Mutex::new(None),
        };
        session.resubscribe();
        session
    }

    /// Read the current state.
    pub fn with_state<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&lock(&self.state))
    }

    pub fn handlers(&self) -> &Arc<EventHandlers> {
        &self.handlers
    }

    /// Reload the sidebar: conversation partners and unseen counts.
    pub async fn refresh_users(&self) -> Result<(), ClientError> {
        match self.api.list_users().await {
            Ok(resp) => {
                let peers = resp.users.len();
                lock(&self.state).set_peers(resp.users, resp.unseen_messages);
                debug!(peers, "Sidebar refreshed");
                Ok(())
            }
            Err(e) => {
                self.notifier.error(&e.to_string());
                Err(e)
            }
        }
    }

    /// Open a conversation (or close it with `None`) and load its history.
    pub async fn select_peer(&self, peer: Option<UserId>) -> Result<(), ClientError> {
        let ticket = lock(&self.state).select(peer);
        self.resubscribe();

        let Some(ticket) = ticket else {
            return Ok(());
        };

        match self.api.list_messages(&ticket.peer).await {
            Ok(messages) => {
                let count = messages.len();
                if lock(&self.state).apply_history(&ticket, messages) {
                    debug!(peer = %ticket.peer, count, "History loaded");
                } else {
                    debug!(peer = %ticket.peer, "Discarded stale history");
                }
                Ok(())
            }
            Err(e) => {
                let current = lock(&self.state).is_current(&ticket);
                if current {
                    self.notifier.error(&e.to_string());
                    Err(e)
                } else {
                    debug!(peer = %ticket.peer, error = %e, "Stale history request failed");
                    Ok(())
                }
            }
        }
    }

    /// Send trimmed text. Whitespace-only input is ignored (`Ok(None)`).
    pub async fn send_text(&self, text: &str) -> Result<Option<Message>, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        self.send_message(MessagePayload::text(text)).await.map(Some)
    }

    pub async fn send_image(&self, mime: &str, bytes: &[u8]) -> Result<Message, ClientError> {
        let data_uri = attachment::encode_image(mime, bytes).map_err(|e| {
            self.notifier.error(&e.to_string());
            ClientError::from(e)
        })?;
        self.send_message(MessagePayload::image(data_uri)).await
    }

    /// Send to the selected peer and append the acknowledged record. Fails
    /// before any network call when nothing is selected.
    pub async fn send_message(&self, payload: MessagePayload) -> Result<Message, ClientError> {
        let peer = lock(&self.state).selected_peer().cloned();
        let Some(peer) = peer else {
            self.notifier.error("No user selected");
            return Err(ClientError::NoPeerSelected);
        };

        match self.api.send_message(&peer, &payload).await {
            Ok(message) => {
                let appended = lock(&self.state).push_sent(message.clone());
                debug!(message_id = %message.id, peer = %peer, appended, "Message sent");
                Ok(message)
            }
            Err(e) => {
                self.notifier.error(&e.to_string());
                Err(e)
            }
        }
    }

    pub async fn update_profile(
        &self,
        display_name: &str,
        avatar: Option<String>,
    ) -> Result<UserProfile, ClientError> {
        let update = ProfileUpdate {
            display_name: display_name.to_string(),
            avatar,
        };
        match self.api.update_profile(&update).await {
            Ok(profile) => {
                info!(user = %profile.id, "Profile updated");
                Ok(profile)
            }
            Err(e) => {
                self.notifier.error(&e.to_string());
                Err(e)
            }
        }
    }

    fn resubscribe(&self) {
        let state = self.state.clone();
        let api = self.api.clone();

        let mut slot = self
            .message_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = self
            .handlers
            .replace(*slot, EventKind::NewMessage, move |event| {
                if let ServerEvent::NewMessage(message) = event {
                    on_new_message(&state, &api, message.clone());
                }
            });
        *slot = Some(id);
    }
}

impl<A: ChatApi> Drop for ChatSession<A> {
    fn drop(&mut self) {
        self.handlers.unsubscribe(self.presence_handler);
        let slot = self
            .message_handler
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = slot.take() {
            self.handlers.unsubscribe(id);
        }
    }
}

fn on_new_message<A: ChatApi>(state: &Mutex<ChatState>, api: &Arc<A>, message: Message) {
    let sender = message.sender_id.clone();
    let outcome = lock(state).receive(message);

    match outcome {
        Incoming::Appended { mark_seen } => spawn_mark_seen(api.clone(), mark_seen),
        Incoming::Counted { unseen, .. } => {
            debug!(sender = %sender, unseen, "Message for another conversation");
        }
        Incoming::Duplicate => debug!(sender = %sender, "Duplicate live message ignored"),
    }
}

/// Fire-and-forget: the message stays displayed whatever the outcome.
fn spawn_mark_seen<A: ChatApi>(api: Arc<A>, id: MessageId) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(message_id = %id, "No runtime available to mark message seen");
        return;
    };

    runtime.spawn(async move {
        if let Err(e) = api.mark_seen(id).await {
            warn!(message_id = %id, error = %e, "Failed to mark message as seen");
        }
    });
}

fn lock(state: &Mutex<ChatState>) -> MutexGuard<'_, ChatState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
