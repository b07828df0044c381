//! # parley-shared
//!
//! Types shared by the Parley server and client: identities, message records,
//! the socket event protocol, REST envelopes and signed session tokens.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod token;
pub mod types;

pub use error::{PayloadError, TokenError, UserIdError};
pub use protocol::{EventKind, ServerEvent};
pub use token::SessionToken;
pub use types::{Message, MessageId, MessagePayload, UserId, UserProfile};
