//! # parley-client
//!
//! Client library for Parley: conversation state, REST access, the realtime
//! socket and the event handler registry that connects them.

pub mod api;
pub mod attachment;
pub mod error;
pub mod events;
pub mod session;
pub mod socket;
pub mod state;

pub use api::{ChatApi, HttpChatApi};
pub use error::{AttachmentError, ClientError};
pub use events::{EventHandlers, HandlerId, LogNotifier, Notifier};
pub use session::ChatSession;
pub use socket::RealtimeClient;
pub use state::{ChatState, HistoryTicket, Incoming, Selection};
