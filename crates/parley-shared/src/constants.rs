/// Socket event carrying the full list of online user ids.
pub const EVENT_GET_ONLINE_USERS: &str = "getOnlineUsers";

/// Socket event carrying a single message record for its recipient.
pub const EVENT_NEW_MESSAGE: &str = "newMessage";

/// Path of the WebSocket endpoint.
pub const SOCKET_PATH: &str = "/socket";

/// Prefix of the message REST routes.
pub const MESSAGES_API_PREFIX: &str = "/api/messages";

/// Handshake query parameter carrying a signed session token.
pub const HANDSHAKE_TOKEN_PARAM: &str = "token";

/// Handshake query parameter carrying a raw user id (legacy clients).
pub const HANDSHAKE_USER_ID_PARAM: &str = "userId";

/// Maximum size of an image attachment before encoding (4 MiB)
pub const MAX_IMAGE_BYTES: usize = 4 * 1024 * 1024;

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 5000;
