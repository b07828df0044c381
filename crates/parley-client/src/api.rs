//! REST access to the chat server.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use parley_shared::constants::MESSAGES_API_PREFIX;
use parley_shared::protocol::{
    MessagesResponse, ProfileResponse, ProfileUpdate, SendMessageResponse, UsersResponse,
};
use parley_shared::{Message, MessageId, MessagePayload, UserId, UserProfile};

use crate::error::ClientError;

/// Calls the session makes against the server. Implemented over HTTP by
/// [`HttpChatApi`]; tests substitute in-memory fakes.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    async fn list_users(&self) -> Result<UsersResponse, ClientError>;

    async fn list_messages(&self, peer: &UserId) -> Result<Vec<Message>, ClientError>;

    async fn send_message(
        &self,
        peer: &UserId,
        payload: &MessagePayload,
    ) -> Result<Message, ClientError>;

    async fn mark_seen(&self, id: MessageId) -> Result<(), ClientError>;

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ClientError>;
}

pub struct HttpChatApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpChatApi {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(base_url));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url,
            token: token.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn messages_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, MESSAGES_API_PREFIX, path)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_users(&self) -> Result<UsersResponse, ClientError> {
        let resp = self
            .http
            .get(self.messages_url("/users"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(resp).await
    }

    async fn list_messages(&self, peer: &UserId) -> Result<Vec<Message>, ClientError> {
        let resp = self
            .http
            .get(self.messages_url(&format!("/{peer}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body: MessagesResponse = decode(resp).await?;
        Ok(body.messages)
    }

    async fn send_message(
        &self,
        peer: &UserId,
        payload: &MessagePayload,
    ) -> Result<Message, ClientError> {
        let resp = self
            .http
            .post(self.messages_url(&format!("/send/{peer}")))
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await?;
        let body: SendMessageResponse = decode(resp).await?;
        Ok(body.new_message)
    }

    async fn mark_seen(&self, id: MessageId) -> Result<(), ClientError> {
        let resp = self
            .http
            .put(self.messages_url(&format!("/mark/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let _: Value = decode(resp).await?;
        Ok(())
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ClientError> {
        let resp = self
            .http
            .put(format!("{}/api/users/me", self.base_url))
            .bearer_auth(&self.token)
            .json(update)
            .send()
            .await?;
        let body: ProfileResponse = decode(resp).await?;
        Ok(body.user)
    }
}

/// Every endpoint answers with a `success` envelope; failures carry a
/// `message` regardless of HTTP status.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    let body: Value = resp
        .json()
        .await
        .map_err(|e| ClientError::Decode(format!("HTTP {status}: {e}")))?;
    parse_envelope(status.as_u16(), body)
}

fn parse_envelope<T: DeserializeOwned>(status: u16, body: Value) -> Result<T, ClientError> {
    if body.get("success").and_then(Value::as_bool) != Some(true) {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Request failed with HTTP {status}"));
        return Err(ClientError::Server(message));
    }

    serde_json::from_value(body).map_err(|e| ClientError::Decode(e.to_string()))
}
