//! Realtime connection to the server's `/socket` endpoint.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use parley_shared::constants::{HANDSHAKE_TOKEN_PARAM, SOCKET_PATH};
use parley_shared::ServerEvent;

use crate::error::ClientError;
use crate::events::EventHandlers;

/// Build `ws(s)://host/socket?token=...` from the REST base URL.
pub fn socket_url(base_url: &str, token: &str) -> Result<String, ClientError> {
    let base = base_url.trim().trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(ClientError::InvalidUrl(base.to_string()));
    };

    Ok(format!(
        "{ws_base}{SOCKET_PATH}?{HANDSHAKE_TOKEN_PARAM}={}",
        token.trim()
    ))
}

/// A live socket whose events are dispatched to an [`EventHandlers`]
/// registry from a background task.
pub struct RealtimeClient {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    pub async fn connect(
        base_url: &str,
        token: &str,
        handlers: Arc<EventHandlers>,
    ) -> Result<Self, ClientError> {
        let url = socket_url(base_url, token)?;
        let (ws, _) = connect_async(url.as_str()).await?;
        info!(server = base_url, "Realtime socket connected");

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ws = ws;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        if let Err(e) = ws.close(None).await {
                            debug!(error = %e, "Close handshake failed");
                        }
                        break;
                    }
                    frame = ws.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match ServerEvent::from_json(text.as_str()) {
                                Ok(event) => {
                                    handlers.dispatch(&event);
                                }
                                Err(e) => warn!(error = %e, "Ignoring malformed event"),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!("Realtime socket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "Realtime socket failed");
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Close the socket and wait for the reader task to stop.
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            debug!(error = %e, "Realtime task ended abnormally");
        }
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            self.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_follows_scheme() {
        assert_eq!(
            socket_url("http://localhost:5000/", "abc").unwrap(),
            "ws://localhost:5000/socket?token=abc"
        );
        assert_eq!(
            socket_url("https://chat.example.org", "abc").unwrap(),
            "wss://chat.example.org/socket?token=abc"
        );
        assert!(socket_url("localhost:5000", "abc").is_err());
    }
}
