//! Inputs and aggregates of the store API.
//!
//! Records that cross the wire (`Message`, `UserProfile`) live in
//! `parley-shared`; this module only holds store-side shapes.

use std::collections::HashMap;

use parley_shared::{MessagePayload, PayloadError, UserId, UserProfile};

/// A validated message waiting to be persisted.
///
/// Can only be built from a payload with text or image, so every row the
/// store writes satisfies the message invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub text: Option<String>,
    pub image: Option<String>,
}

impl NewMessage {
    pub fn new(
        sender_id: UserId,
        recipient_id: UserId,
        payload: MessagePayload,
    ) -> Result<Self, PayloadError> {
        let payload = payload.validate()?;
        Ok(Self {
            sender_id,
            recipient_id,
            text: payload.text,
            image: payload.image,
        })
    }
}

/// Conversation partners of a user plus unseen counts per partner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerList {
    /// Most recently active conversation first.
    pub peers: Vec<UserProfile>,
    /// Messages from each peer still unseen by the user. Peers with nothing
    /// unseen are absent.
    pub unseen: HashMap<UserId, u32>,
}

/// Outcome of a mark-seen request on an existing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenUpdate {
    Marked,
    AlreadySeen,
}
