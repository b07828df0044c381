//! Client-side conversation state.
//!
//! [`ChatState`] is a plain struct with no I/O. The session drives it from
//! REST responses and socket events; every transition here is synchronous so
//! it can be held under a short lock.

use std::collections::{HashMap, HashSet};

use parley_shared::{Message, MessageId, UserId, UserProfile};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    NoPeerSelected,
    PeerSelected(UserId),
}

/// Issued when a peer is selected; a history response is only applied if its
/// ticket still matches the current selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTicket {
    pub peer: UserId,
    generation: u64,
}

/// What happened to an incoming `newMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Appended to the open conversation; the id should be marked seen.
    Appended { mark_seen: MessageId },
    /// Counted as unseen for its sender.
    Counted { sender: UserId, unseen: u32 },
    /// Already displayed.
    Duplicate,
}

#[derive(Debug, Default)]
pub struct ChatState {
    selection: Selection,
    messages: Vec<Message>,
    peers: Vec<UserProfile>,
    unseen: HashMap<UserId, u32>,
    online: HashSet<UserId>,
    generation: u64,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the selected peer. Clears the visible list; selecting a peer
    /// resets its unseen count and returns the ticket for its history fetch.
    pub fn select(&mut self, peer: Option<UserId>) -> Option<HistoryTicket> {
        self.generation += 1;
        self.messages.clear();

        match peer {
            Some(peer) => {
                self.unseen.remove(&peer);
                self.selection = Selection::PeerSelected(peer.clone());
                Some(HistoryTicket {
                    peer,
                    generation: self.generation,
                })
            }
            None => {
                self.selection = Selection::NoPeerSelected;
                None
            }
        }
    }

    /// Merge fetched history into the visible list. Messages that arrived
    /// live while the fetch was in flight are kept unless the history already
    /// holds them. Returns `false` and leaves the state untouched when the
    /// selection moved on meanwhile.
    pub fn apply_history(&mut self, ticket: &HistoryTicket, messages: Vec<Message>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }

        let fetched: HashSet<MessageId> = messages.iter().map(|m| m.id).collect();
        let live = std::mem::replace(&mut self.messages, messages);
        self.messages
            .extend(live.into_iter().filter(|m| !fetched.contains(&m.id)));
        // Stable, so equal timestamps keep history order.
        self.messages.sort_by_key(|m| m.created_at);
        true
    }

    pub fn is_current(&self, ticket: &HistoryTicket) -> bool {
        ticket.generation == self.generation
            && self.selection == Selection::PeerSelected(ticket.peer.clone())
    }

    /// Apply a live `newMessage`.
    pub fn receive(&mut self, mut message: Message) -> Incoming {
        if self.messages.iter().any(|m| m.id == message.id) {
            return Incoming::Duplicate;
        }

        if self.selected_peer() == Some(&message.sender_id) {
            let id = message.id;
            message.seen = true;
            self.messages.push(message);
            return Incoming::Appended { mark_seen: id };
        }

        let count = self.unseen.entry(message.sender_id.clone()).or_insert(0);
        *count += 1;
        Incoming::Counted {
            unseen: *count,
            sender: message.sender_id,
        }
    }

    /// Append a server-acknowledged outgoing message if its conversation is
    /// still open.
    pub fn push_sent(&mut self, message: Message) -> bool {
        if self.selected_peer() != Some(&message.recipient_id)
            || self.messages.iter().any(|m| m.id == message.id)
        {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Replace the sidebar. The open conversation keeps an unseen count of 0.
    pub fn set_peers(&mut self, peers: Vec<UserProfile>, unseen: HashMap<UserId, u32>) {
        self.peers = peers;
        self.unseen = unseen;
        self.unseen.retain(|_, count| *count > 0);
        if let Selection::PeerSelected(peer) = &self.selection {
            self.unseen.remove(peer);
        }
    }

    pub fn set_online(&mut self, users: Vec<UserId>) {
        self.online = users.into_iter().collect();
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }

    pub fn online_users(&self) -> &HashSet<UserId> {
        &self.online
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selected_peer(&self) -> Option<&UserId> {
        match &self.selection {
            Selection::PeerSelected(peer) => Some(peer),
            Selection::NoPeerSelected => None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn peers(&self) -> &[UserProfile] {
        &self.peers
    }

    pub fn unseen_count(&self, peer: &UserId) -> u32 {
        self.unseen.get(peer).copied().unwrap_or(0)
    }
}
