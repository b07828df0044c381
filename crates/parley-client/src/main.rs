//! `parley`: terminal chat client.
//!
//! Commands typed on stdin:
//! - `/open <user>`  open a conversation and print its history
//! - `/close`        close the current conversation
//! - `/users`        list conversations with unseen counts
//! - `/image <path>` send an image to the open conversation
//! - `/quit`         exit
//!
//! Any other line is sent as text to the open conversation.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use parley_client::attachment::mime_from_extension;
use parley_client::{
    ChatSession, EventHandlers, HttpChatApi, LogNotifier, RealtimeClient,
};
use parley_shared::{EventKind, Message, ServerEvent, UserId};

#[derive(Debug, Parser)]
#[command(name = "parley", version, about = "Terminal client for a Parley chat server")]
struct Args {
    /// Base URL of the chat server.
    #[arg(long, env = "PARLEY_SERVER_URL", default_value = "http://localhost:5000")]
    server_url: String,

    /// Session token issued by the auth service.
    #[arg(long, env = "PARLEY_TOKEN")]
    token: String,

    /// Conversation to open on startup.
    #[arg(long)]
    peer: Option<String>,

    /// Publish this display name before starting.
    #[arg(long)]
    display_name: Option<String>,

    /// HTTP request timeout in seconds.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley_client=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let api = Arc::new(HttpChatApi::new(
        &args.server_url,
        &args.token,
        Duration::from_secs(args.timeout_secs),
    )?);
    let handlers = Arc::new(EventHandlers::new());
    let session = ChatSession::new(api.clone(), handlers.clone(), Arc::new(LogNotifier));

    handlers.subscribe(EventKind::NewMessage, |event| {
        if let ServerEvent::NewMessage(message) = event {
            print_message(message);
        }
    });

    let socket = RealtimeClient::connect(api.base_url(), &args.token, handlers.clone())
        .await
        .context("connecting realtime socket")?;

    if let Some(name) = &args.display_name {
        session.update_profile(name, None).await?;
    }
    session.refresh_users().await?;
    print_users(&session);

    if let Some(peer) = args.peer.as_deref() {
        open(&session, peer).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

        match command {
            "/quit" => break,
            "/users" => {
                if session.refresh_users().await.is_ok() {
                    print_users(&session);
                }
            }
            "/open" => open(&session, rest.trim()).await,
            "/close" => {
                let _ = session.select_peer(None).await;
            }
            "/image" => {
                let path = Path::new(rest.trim());
                let Some(mime) = mime_from_extension(path) else {
                    out(format_args!("not an image: {}", path.display()));
                    continue;
                };
                match tokio::fs::read(path).await {
                    Ok(bytes) => {
                        if let Ok(sent) = session.send_image(mime, &bytes).await {
                            print_message(&sent);
                        }
                    }
                    Err(e) => out(format_args!("cannot read {}: {e}", path.display())),
                }
            }
            _ => {
                if let Ok(Some(sent)) = session.send_text(line).await {
                    print_message(&sent);
                }
            }
        }
    }

    socket.close().await;
    Ok(())
}

async fn open(session: &ChatSession<HttpChatApi>, peer: &str) {
    let peer = match UserId::parse(peer) {
        Ok(peer) => peer,
        Err(e) => {
            out(format_args!("{e}"));
            return;
        }
    };

    if session.select_peer(Some(peer.clone())).await.is_ok() {
        let online = session.with_state(|s| s.is_online(&peer));
        out(format_args!(
            "── {peer} ({}) ──",
            if online { "online" } else { "offline" }
        ));
        let history = session.with_state(|s| s.messages().to_vec());
        for message in &history {
            print_message(message);
        }
    }
}

fn print_users<A: parley_client::ChatApi>(session: &ChatSession<A>) {
    session.with_state(|state| {
        for peer in state.peers() {
            let unseen = state.unseen_count(&peer.id);
            let online = if state.is_online(&peer.id) { "*" } else { " " };
            if unseen > 0 {
                out(format_args!("{online} {} ({}) [{unseen}]", peer.display_name, peer.id));
            } else {
                out(format_args!("{online} {} ({})", peer.display_name, peer.id));
            }
        }
    });
}

fn print_message(message: &Message) {
    let time = message.created_at.format("%H:%M");
    let body = match (&message.text, &message.image) {
        (Some(text), Some(_)) => format!("{text} [image]"),
        (Some(text), None) => text.clone(),
        (None, Some(_)) => "[image]".to_string(),
        (None, None) => String::new(),
    };
    out(format_args!("[{time}] {}: {body}", message.sender_id));
}

fn out(line: std::fmt::Arguments<'_>) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
}
