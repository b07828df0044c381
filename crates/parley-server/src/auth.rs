//! Session token verification and caching.
//!
//! Verifies `SessionToken`s signed by the auth service with ed25519-dalek
//! and caches successful verifications so repeated requests skip the
//! signature check.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use parley_shared::{SessionToken, TokenError, UserId};

use crate::error::ServerError;

/// Identity of the caller, inserted into request extensions by
/// [`require_auth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

#[derive(Debug, Clone)]
struct CachedIdentity {
    user_id: UserId,
    valid_until: DateTime<Utc>,
}

impl CachedIdentity {
    fn is_fresh(&self) -> bool {
        Utc::now() < self.valid_until
    }
}

#[derive(Clone)]
pub struct TokenVerifier {
    /// The auth service's Ed25519 public key.
    auth_pubkey: [u8; 32],
    /// Cache: encoded token -> verified identity.
    cache: Arc<RwLock<HashMap<String, CachedIdentity>>>,
}

impl TokenVerifier {
    pub fn new(auth_pubkey: [u8; 32]) -> Self {
        Self {
            auth_pubkey,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Verify an encoded token and return the user it names.
    pub async fn verify(&self, encoded: &str) -> Result<UserId, ServerError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(encoded) {
                if entry.is_fresh() {
                    debug!(user = %entry.user_id, "Session served from cache");
                    return Ok(entry.user_id.clone());
                }
            }
        }

        // An unconfigured key must not accept anything, including
        // signatures crafted against the small-order zero point.
        if self.auth_pubkey == [0u8; 32] {
            warn!("No auth key configured, rejecting token");
            return Err(ServerError::Unauthorized(TokenError::InvalidKey.to_string()));
        }

        let token = SessionToken::decode(encoded).map_err(|e| {
            warn!(error = %e, "Rejected malformed session token");
            ServerError::Unauthorized(e.to_string())
        })?;

        if let Err(e) = token.verify_with_key(&self.auth_pubkey) {
            warn!(user = %token.user_id, error = %e, "Session verification failed");
            return Err(ServerError::Unauthorized(e.to_string()));
        }

        self.cache.write().await.insert(
            encoded.to_string(),
            CachedIdentity {
                user_id: token.user_id.clone(),
                valid_until: token.valid_until,
            },
        );

        info!(user = %token.user_id, until = %token.valid_until, "Session verified");

        Ok(token.user_id)
    }

    /// Evict expired entries from the cache.
    pub async fn purge_expired(&self) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.is_fresh());
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, remaining = cache.len(), "Purged expired sessions");
        }
    }

    #[cfg(test)]
    async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

/// Reject requests without a valid `Authorization: Bearer <token>` header.
pub async fn require_auth(
    State(verifier): State<TokenVerifier>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServerError::Unauthorized("Missing bearer token".into()))?;

    let user = verifier.verify(token).await?;
    req.extensions_mut().insert(AuthUser(user));

    Ok(next.run(req).await)
}
