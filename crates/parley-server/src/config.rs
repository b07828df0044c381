//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parley_shared::constants::{DEFAULT_HTTP_PORT, MAX_IMAGE_BYTES};

/// Where the message database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Platform data directory (`parley/parley.db`).
    Default,
    /// Explicit file path.
    Path(PathBuf),
    /// Private in-memory database, lost on restart.
    InMemory,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`, or `PORT` to change only the port.
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// Env: `DATABASE_PATH` (`:memory:` for an in-memory database)
    /// Default: platform data directory.
    pub database: DatabaseLocation,

    /// Ed25519 public key of the auth service that signs session tokens
    /// (hex-encoded, 64 chars).
    /// Env: `AUTH_PUBKEY`
    /// Default: all-zeros, which rejects every token (development only).
    pub auth_pubkey: [u8; 32],

    /// Upper bound for any single store operation.
    /// Env: `STORE_TIMEOUT_MS`
    /// Default: 5000
    pub store_timeout: Duration,

    /// Maximum request body size. Must fit a base64 image of `MAX_IMAGE_BYTES`.
    /// Env: `MAX_BODY_BYTES`
    /// Default: 6 MiB
    pub max_body_bytes: usize,

    /// Accept the raw `userId` handshake parameter from sockets that present
    /// no token.
    /// Env: `LEGACY_USER_ID_HANDSHAKE` (true/false)
    /// Default: `false`
    pub legacy_user_id_handshake: bool,

    /// Allowed CORS origin; `None` allows any origin.
    /// Env: `CORS_ALLOW_ORIGIN` (`*` for any)
    /// Default: any.
    pub cors_allow_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database: DatabaseLocation::Default,
            auth_pubkey: [0u8; 32],
            store_timeout: Duration::from_millis(5000),
            max_body_bytes: MAX_IMAGE_BYTES * 3 / 2,
            legacy_user_id_handshake: false,
            cors_allow_origin: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        } else if let Some(port) = lookup("PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database = match path.as_str() {
                "" => DatabaseLocation::Default,
                ":memory:" => DatabaseLocation::InMemory,
                _ => DatabaseLocation::Path(PathBuf::from(path)),
            };
        }

        if let Some(hex_key) = lookup("AUTH_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.auth_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid AUTH_PUBKEY, using default (rejects all tokens)"
                    );
                }
            }
        }

        if let Some(val) = lookup("STORE_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.store_timeout = Duration::from_millis(ms.max(1));
            }
        }

        if let Some(val) = lookup("MAX_BODY_BYTES") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_body_bytes = n;
            }
        }

        if let Some(val) = lookup("LEGACY_USER_ID_HANDSHAKE") {
            config.legacy_user_id_handshake = val == "true" || val == "1";
        }

        if let Some(origin) = lookup("CORS_ALLOW_ORIGIN") {
            if !origin.is_empty() && origin != "*" {
                config.cors_allow_origin = Some(origin);
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(value: &str) -> Result<[u8; 32], String> {
    let value = value.trim();
    if value.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", value.len()));
    }

    let bytes = hex::decode(value).map_err(|e| e.to_string())?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
