//! Conversation operations shared by the REST handlers.
//!
//! Persists messages through the [`MessageRepository`] and pushes live
//! copies to recipients that are currently online.

use tracing::{debug, info, warn};

use parley_shared::protocol::ProfileUpdate;
use parley_shared::{Message, MessageId, MessagePayload, ServerEvent, UserId, UserProfile};
use parley_store::{NewMessage, PeerList, SeenUpdate};

use crate::error::ServerError;
use crate::presence::PresenceRegistry;
use crate::realtime::RealtimeChannel;
use crate::repository::MessageRepository;

#[derive(Clone)]
pub struct ConversationController {
    repo: MessageRepository,
    presence: PresenceRegistry,
    channel: RealtimeChannel,
}

impl ConversationController {
    pub fn new(
        repo: MessageRepository,
        presence: PresenceRegistry,
        channel: RealtimeChannel,
    ) -> Self {
        Self {
            repo,
            presence,
            channel,
        }
    }

    /// Persist a message from `sender` to `recipient` and deliver it live if
    /// the recipient is online. Live delivery failure does not fail the send.
    pub async fn send_message(
        &self,
        sender: &UserId,
        recipient: &UserId,
        payload: MessagePayload,
    ) -> Result<Message, ServerError> {
        let new = NewMessage::new(sender.clone(), recipient.clone(), payload)?;
        self.repo.get_user(recipient).await?;

        let message = self.repo.create(new).await?;
        info!(
            message_id = %message.id,
            sender = %sender,
            recipient = %recipient,
            has_image = message.image.is_some(),
            "Message sent"
        );

        self.deliver(&message).await;
        Ok(message)
    }

    pub async fn mark_seen(&self, id: MessageId) -> Result<SeenUpdate, ServerError> {
        let update = self.repo.mark_seen(id).await?;
        debug!(message_id = %id, ?update, "Mark seen");
        Ok(update)
    }

    pub async fn list_peers(&self, user: &UserId) -> Result<PeerList, ServerError> {
        self.repo.list_peers(user).await
    }

    /// Conversation history between `user` and `peer`, oldest first. Opening
    /// a conversation marks the returned messages `peer` sent to `user` as
    /// seen; the records still carry their state from before that update.
    pub async fn list_messages(
        &self,
        user: &UserId,
        peer: &UserId,
    ) -> Result<Vec<Message>, ServerError> {
        self.repo.open_conversation(user, peer).await
    }

    pub async fn update_profile(
        &self,
        user: &UserId,
        update: ProfileUpdate,
    ) -> Result<UserProfile, ServerError> {
        let display_name = update.display_name.trim();
        if display_name.is_empty() {
            return Err(ServerError::BadRequest("Display name must not be empty".into()));
        }

        let profile = UserProfile {
            id: user.clone(),
            display_name: display_name.to_string(),
            avatar: update.avatar.filter(|a| !a.trim().is_empty()),
        };
        self.repo.upsert_user(profile).await
    }

    async fn deliver(&self, message: &Message) {
        let Some(connection) = self.presence.connection_of(&message.recipient_id).await else {
            debug!(
                message_id = %message.id,
                recipient = %message.recipient_id,
                "Recipient offline, skipping live delivery"
            );
            return;
        };

        match self
            .channel
            .emit_to(&connection, ServerEvent::NewMessage(message.clone()))
            .await
        {
            Ok(()) => debug!(
                message_id = %message.id,
                connection = %connection,
                "Delivered live"
            ),
            Err(e) => warn!(
                message_id = %message.id,
                recipient = %message.recipient_id,
                error = %e,
                "Live delivery failed"
            ),
        }
    }
}
