use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Extension, Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_shared::constants::{MESSAGES_API_PREFIX, SOCKET_PATH};
use parley_shared::protocol::{
    AckResponse, MessagesResponse, ProfileResponse, ProfileUpdate, SendMessageResponse,
    UsersResponse,
};
use parley_shared::{MessageId, MessagePayload, UserId};
use parley_store::SeenUpdate;

use crate::auth::{require_auth, AuthUser, TokenVerifier};
use crate::config::ServerConfig;
use crate::controller::ConversationController;
use crate::error::ServerError;
use crate::presence::PresenceRegistry;
use crate::realtime::RealtimeChannel;
use crate::socket;

#[derive(Clone)]
pub struct AppState {
    pub controller: ConversationController,
    pub presence: PresenceRegistry,
    pub channel: RealtimeChannel,
    pub verifier: TokenVerifier,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);
    let cors = match state
        .config
        .cors_allow_origin
        .as_deref()
        .map(HeaderValue::from_str)
    {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(e)) => {
            warn!(error = %e, "Invalid CORS_ALLOW_ORIGIN, allowing any origin");
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    };

    let messages = Router::new()
        .route("/users", get(list_users))
        .route("/{peer_id}", get(list_messages))
        .route("/send/{peer_id}", post(send_message))
        .route("/mark/{message_id}", put(mark_seen));

    let protected = Router::new()
        .nest(MESSAGES_API_PREFIX, messages)
        .route("/api/users/me", put(update_profile))
        .route_layer(middleware::from_fn_with_state(
            state.verifier.clone(),
            require_auth,
        ));

    Router::new()
        .route("/api/status", get(status))
        .route(SOCKET_PATH, get(socket::socket_upgrade))
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status() -> &'static str {
    "Server is running"
}

async fn list_users(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<UsersResponse>, ServerError> {
    let list = state.controller.list_peers(&user).await?;
    Ok(Json(UsersResponse {
        success: true,
        users: list.peers,
        unseen_messages: list.unseen,
    }))
}

async fn list_messages(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(peer_id): Path<String>,
) -> Result<Json<MessagesResponse>, ServerError> {
    let peer = parse_peer(&peer_id)?;
    let messages = state.controller.list_messages(&user, &peer).await?;
    Ok(Json(MessagesResponse {
        success: true,
        messages,
    }))
}

async fn send_message(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(peer_id): Path<String>,
    payload: Result<Json<MessagePayload>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ServerError> {
    let recipient = parse_peer(&peer_id)?;
    let Json(payload) = payload.map_err(|e| ServerError::BadRequest(e.body_text()))?;

    let new_message = state
        .controller
        .send_message(&user, &recipient, payload)
        .await?;

    Ok(Json(SendMessageResponse {
        success: true,
        new_message,
    }))
}

async fn mark_seen(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<AckResponse>, ServerError> {
    let id: MessageId = message_id
        .parse()
        .map_err(|_| ServerError::BadRequest("Invalid message id".into()))?;

    let message = match state.controller.mark_seen(id).await? {
        SeenUpdate::Marked => "Message marked as seen",
        SeenUpdate::AlreadySeen => "Message already seen",
    };

    Ok(Json(AckResponse {
        success: true,
        message: Some(message.to_string()),
    }))
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    update: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<ProfileResponse>, ServerError> {
    let Json(update) = update.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let user = state.controller.update_profile(&user, update).await?;

    info!(user = %user.id, "Profile updated");
    Ok(Json(ProfileResponse {
        success: true,
        user,
    }))
}

fn parse_peer(raw: &str) -> Result<UserId, ServerError> {
    UserId::parse(raw).map_err(|e| ServerError::BadRequest(e.to_string()))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use chrono::Duration as ChronoDuration;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use parley_store::Database;

    use crate::auth::tests::issue;
    use crate::repository::MessageRepository;

    pub(crate) fn test_state(key: &SigningKey, config: ServerConfig) -> AppState {
        let repo = MessageRepository::new(
            Database::open_in_memory().unwrap(),
            Duration::from_secs(5),
        );
        let channel = RealtimeChannel::new();
        let presence = PresenceRegistry::new(channel.clone());
        AppState {
            controller: ConversationController::new(repo, presence.clone(), channel.clone()),
            presence,
            channel,
            verifier: TokenVerifier::new(key.verifying_key().to_bytes()),
            config: Arc::new(config),
        }
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register_profile(app: &Router, token: &str, name: &str) {
        let (status, body) = call(
            app,
            Method::PUT,
            "/api/users/me",
            Some(token),
            Some(json!({ "displayName": name })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["displayName"], name);
    }

    #[tokio::test]
    async fn status_is_public() {
        let key = SigningKey::generate(&mut OsRng);
        let app = build_router(test_state(&key, ServerConfig::default()));

        let resp = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"Server is running");
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let key = SigningKey::generate(&mut OsRng);
        let app = build_router(test_state(&key, ServerConfig::default()));

        let (status, body) = call(&app, Method::GET, "/api/messages/users", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn send_list_and_mark_flow() {
        let key = SigningKey::generate(&mut OsRng);
        let app = build_router(test_state(&key, ServerConfig::default()));
        let alice = issue(&key, "alice", ChronoDuration::hours(1));
        let bob = issue(&key, "bob", ChronoDuration::hours(1));
        register_profile(&app, &alice, "Alice").await;
        register_profile(&app, &bob, "Bob").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/messages/send/bob",
            Some(&alice),
            Some(json!({ "text": "hello bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["newMessage"]["senderId"], "alice");
        assert_eq!(body["newMessage"]["seen"], false);
        let message_id = body["newMessage"]["id"].as_str().unwrap().to_string();

        let (_, body) = call(&app, Method::GET, "/api/messages/users", Some(&bob), None).await;
        assert_eq!(body["users"][0]["id"], "alice");
        assert_eq!(body["users"][0]["displayName"], "Alice");
        assert_eq!(body["unseenMessages"]["alice"], 1);

        let (_, body) = call(&app, Method::GET, "/api/messages/alice", Some(&bob), None).await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["text"], "hello bob");

        let uri = format!("/api/messages/mark/{message_id}");
        let (status, body) = call(&app, Method::PUT, &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _) = call(&app, Method::PUT, &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, "/api/messages/users", Some(&bob), None).await;
        assert!(body["unseenMessages"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_a_validation_error() {
        let key = SigningKey::generate(&mut OsRng);
        let app = build_router(test_state(&key, ServerConfig::default()));
        let alice = issue(&key, "alice", ChronoDuration::hours(1));
        let bob = issue(&key, "bob", ChronoDuration::hours(1));
        register_profile(&app, &bob, "Bob").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/messages/send/bob",
            Some(&alice),
            Some(json!({ "text": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Message must contain text or an image");

        let (_, body) = call(&app, Method::GET, "/api/messages/alice", Some(&bob), None).await;
        assert!(body["messages"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_message_and_recipient_are_not_found() {
        let key = SigningKey::generate(&mut OsRng);
        let app = build_router(test_state(&key, ServerConfig::default()));
        let alice = issue(&key, "alice", ChronoDuration::hours(1));

        let uri = format!("/api/messages/mark/{}", MessageId::new());
        let (status, body) = call(&app, Method::PUT, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Message not found");

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/messages/send/nobody",
            Some(&alice),
            Some(json!({ "text": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            Method::PUT,
            "/api/messages/mark/not-a-uuid",
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
