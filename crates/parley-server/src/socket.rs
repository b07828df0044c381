//! WebSocket endpoint.
//!
//! The handshake is authenticated before the upgrade: an invalid token gets
//! a plain 401 and never touches presence. Accepted sockets attach to the
//! realtime channel first and only then register, so a connection always
//! receives the presence snapshot that includes itself.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use parley_shared::UserId;

use crate::api::AppState;
use crate::auth::TokenVerifier;
use crate::error::ServerError;
use crate::realtime::ConnectionId;

#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    pub token: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// Resolve who is connecting. `Ok(None)` is an anonymous socket: it gets
/// broadcasts but is never registered as online.
pub async fn resolve_identity(
    query: &HandshakeQuery,
    verifier: &TokenVerifier,
    legacy_user_id: bool,
) -> Result<Option<UserId>, ServerError> {
    if let Some(token) = query.token.as_deref().filter(|t| !t.is_empty()) {
        return verifier.verify(token).await.map(Some);
    }

    if legacy_user_id {
        return Ok(UserId::from_handshake(query.user_id.as_deref()));
    }

    Err(ServerError::Unauthorized("Missing session token".into()))
}

pub async fn socket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
) -> Result<Response, ServerError> {
    let identity = resolve_identity(
        &query,
        &state.verifier,
        state.config.legacy_user_id_handshake,
    )
    .await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity)))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: Option<UserId>) {
    let connection = ConnectionId::new();
    let mut outbound = state.channel.attach(connection).await;

    match &identity {
        Some(user) => {
            info!(user = %user, connection = %connection, "User connected");
            state.presence.register(user, connection).await;
        }
        None => debug!(connection = %connection, "Anonymous socket connected"),
    }

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(connection = %connection, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Clients never send application frames; read only to observe close.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %connection, error = %e, "Socket read failed");
                break;
            }
        }
    }

    state.channel.detach(&connection).await;
    writer.abort();

    if let Some(user) = identity {
        state.presence.release(&user, connection).await;
        info!(user = %user, connection = %connection, "User disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use parley_shared::ServerEvent;

    use crate::api::build_router;
    use crate::api::tests::test_state;
    use crate::auth::tests::issue;
    use crate::config::ServerConfig;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn query(token: Option<&str>, user_id: Option<&str>) -> HandshakeQuery {
        HandshakeQuery {
            token: token.map(str::to_string),
            user_id: user_id.map(str::to_string),
        }
    }

    async fn spawn_server(state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        addr
    }

    async fn wait_for_connections(state: &AppState, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.channel.connection_count().await != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connections attached");
    }

    async fn next_event(client: &mut Client) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let frame = client.next().await.expect("stream open").expect("frame");
                if let tokio_tungstenite::tungstenite::Message::Text(text) = frame {
                    return ServerEvent::from_json(text.as_str()).expect("event json");
                }
            }
        })
        .await
        .expect("event in time")
    }

    #[tokio::test]
    async fn legacy_placeholder_ids_are_anonymous() {
        let verifier = TokenVerifier::new([0u8; 32]);

        for raw in [None, Some(""), Some("undefined")] {
            let identity = resolve_identity(&query(None, raw), &verifier, true)
                .await
                .unwrap();
            assert_eq!(identity, None);
        }

        let identity = resolve_identity(&query(None, Some("alice")), &verifier, true)
            .await
            .unwrap();
        assert_eq!(identity, Some(uid("alice")));
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_rejected_without_legacy() {
        let key = SigningKey::generate(&mut OsRng);
        let verifier = TokenVerifier::new(key.verifying_key().to_bytes());

        assert!(resolve_identity(&query(None, Some("alice")), &verifier, false)
            .await
            .is_err());
        assert!(resolve_identity(&query(Some("garbage"), None), &verifier, true)
            .await
            .is_err());

        let token = issue(&key, "alice", ChronoDuration::hours(1));
        let identity = resolve_identity(&query(Some(&token), None), &verifier, false)
            .await
            .unwrap();
        assert_eq!(identity, Some(uid("alice")));
    }

    #[tokio::test]
    async fn invalid_handshake_gets_401_and_no_presence() {
        let key = SigningKey::generate(&mut OsRng);
        let state = test_state(&key, ServerConfig::default());
        let addr = spawn_server(state.clone()).await;

        let result = connect_async(format!("ws://{addr}/socket?token=garbage")).await;
        match result {
            Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
                assert_eq!(resp.status().as_u16(), 401);
            }
            Err(e) => panic!("expected HTTP 401, got {e}"),
            Ok(_) => panic!("expected HTTP 401, socket was upgraded"),
        }

        assert_eq!(state.channel.connection_count().await, 0);
        assert!(state.presence.list_online().await.is_empty());
    }

    #[tokio::test]
    async fn presence_follows_socket_lifecycle() {
        let key = SigningKey::generate(&mut OsRng);
        let config = ServerConfig {
            legacy_user_id_handshake: true,
            ..ServerConfig::default()
        };
        let state = test_state(&key, config);
        let addr = spawn_server(state.clone()).await;

        let (mut observer, _) = connect_async(format!("ws://{addr}/socket?userId=undefined"))
            .await
            .unwrap();
        wait_for_connections(&state, 1).await;
        assert!(state.presence.list_online().await.is_empty());

        let token = issue(&key, "alice", ChronoDuration::hours(1));
        let (mut alice, _) = connect_async(format!("ws://{addr}/socket?token={token}"))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut observer).await,
            ServerEvent::OnlineUsers(vec![uid("alice")])
        );
        assert_eq!(
            next_event(&mut alice).await,
            ServerEvent::OnlineUsers(vec![uid("alice")])
        );

        alice.close(None).await.unwrap();

        assert_eq!(
            next_event(&mut observer).await,
            ServerEvent::OnlineUsers(vec![])
        );
        assert!(state.presence.list_online().await.is_empty());
    }
}
