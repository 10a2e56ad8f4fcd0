//! chatlink demo client
//!
//! Usage: `chatlink [config.yaml]` (default `chatlink.yaml`)
//! - Connects to `client.url` with reconnect + heartbeat
//! - Sends each stdin line as a chat message
//! - Logs inbound messages and assembled streams
//! - EOF or Ctrl-C disconnects cleanly (close code 1000)

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use chatlink_client::{
    config, ConnectionManager, ConnectionPhase, EventHandler, SharedAssembler, WsTransport,
};
use chatlink_core::chat::ChatMessage;
use chatlink_core::error::ChatLinkError;
use chatlink_core::protocol::{Envelope, TypingIndicator};

struct ConsoleHandler;

impl EventHandler for ConsoleHandler {
    fn on_open(&self) {
        tracing::info!("connected");
    }

    fn on_close(&self, code: u16, reason: &str) {
        tracing::info!(code, %reason, "disconnected");
    }

    fn on_error(&self, error: &ChatLinkError) {
        tracing::warn!(code = error.code().as_str(), %error, "connection error");
    }

    fn on_reconnect(&self, attempt: u32) {
        tracing::info!(attempt, "reconnecting");
    }

    fn on_typing(&self, indicator: &TypingIndicator) {
        tracing::debug!(agent = ?indicator.agent_id, is_typing = indicator.is_typing, "typing");
    }

    fn on_message(&self, env: &Envelope) {
        match ChatMessage::from_envelope(env) {
            Some(msg) => tracing::info!(role = ?msg.role, id = %msg.id, "{}", msg.content),
            None => tracing::debug!(kind = env.kind().as_str(), id = %env.id(), "inbound"),
        }
    }
}

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "chatlink.yaml".to_string());
    let cfg = match config::load_from_file(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(%path, code = e.code().as_str(), error = %e, "config load failed");
            std::process::exit(2);
        }
    };
    let ordering = cfg.streaming.ordering;
    let close_timeout = cfg.client.close_timeout();

    tracing::info!(url = %cfg.client.url, "chatlink starting");
    let transport = Arc::new(WsTransport::from_config(&cfg.client));
    let manager = ConnectionManager::new(cfg, transport);

    let assembler = SharedAssembler::new(ordering)
        .with_on_complete(|msg| tracing::info!(id = %msg.id, "agent: {}", msg.content))
        .with_on_error(|id, err| tracing::warn!(message_id = %id, error = %err, "stream failed"));
    manager.subscribe(Arc::new(assembler.clone()));
    manager.subscribe(Arc::new(ConsoleHandler));
    manager.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    let id = manager.send_chat_message(text, None);
                    assembler.append_message(ChatMessage::user(id, text, None));
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.disconnect();
    let mut state = manager.watch_state();
    let settled = tokio::time::timeout(
        close_timeout + Duration::from_secs(1),
        state.wait_for(|s| {
            !matches!(s.phase, ConnectionPhase::Connected | ConnectionPhase::Closing)
        }),
    )
    .await;
    if settled.is_err() {
        tracing::warn!("socket did not close in time");
    }

    tracing::debug!(
        messages = assembler.messages().len(),
        "session ended\n{}",
        manager.metrics().render()
    );
}
