use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::types::UserId;

// Token signed by the auth service, presented on REST calls and the socket handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    pub user_id: UserId,
    pub valid_until: DateTime<Utc>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

// payload = user_id || valid_until (rfc3339)
fn signing_payload(user_id: &UserId, valid_until: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(user_id.as_str().as_bytes());
    payload.extend_from_slice(valid_until.to_rfc3339().as_bytes());
    payload
}

impl SessionToken {
    pub fn issue(user_id: UserId, valid_until: DateTime<Utc>, signing_key: &SigningKey) -> Self {
        let signature = signing_key.sign(&signing_payload(&user_id, &valid_until));

        Self {
            user_id,
            valid_until,
            signature: signature.to_bytes().to_vec(),
        }
    }

    pub fn verify_with_key(&self, auth_pubkey: &[u8; 32]) -> Result<(), TokenError> {
        if Utc::now() > self.valid_until {
            return Err(TokenError::Expired);
        }

        let verifying_key =
            VerifyingKey::from_bytes(auth_pubkey).map_err(|_| TokenError::InvalidKey)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| TokenError::InvalidSignature)?;

        verifying_key
            .verify(&signing_payload(&self.user_id, &self.valid_until), &signature)
            .map_err(|_| TokenError::InvalidSignature)
    }

    /// Compact transport form: base64url(JSON).
    pub fn encode(&self) -> Result<String, TokenError> {
        let json = serde_json::to_vec(self).map_err(|e| TokenError::Malformed(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self, TokenError> {
        let json = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| TokenError::Malformed(e.to_string()))
    }
}
