//! Transport layer (socket seam).
//!
//! The Connection Manager talks to a socket only through [`Transport`] and
//! the [`Link`] it returns, so tests can substitute an in-memory socket.
//! [`ws::WsTransport`] is the WebSocket implementation.

pub mod codec;
pub mod ws;

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use chatlink_core::error::{ChatLinkError, Result};

/// Intentional close: the peer must not reconnect.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close frame carried no status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Socket ended without a close frame (or never opened).
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Client -> socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Socket -> client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Error(String),
    /// Emitted exactly once, as the last event of a link.
    Closed { code: u16, reason: String },
}

/// An open socket: frame sender plus event receiver.
#[derive(Debug)]
pub struct Link {
    frames: mpsc::Sender<Frame>,
    events: mpsc::Receiver<TransportEvent>,
}

impl Link {
    pub fn new(frames: mpsc::Sender<Frame>, events: mpsc::Receiver<TransportEvent>) -> Self {
        Self { frames, events }
    }

    /// Readiness: false once the writer side has gone away.
    pub fn is_open(&self) -> bool {
        !self.frames.is_closed()
    }

    /// Hand one text frame to the socket writer without waiting.
    pub fn send_text(&self, text: String) -> Result<()> {
        self.frames.try_send(Frame::Text(text)).map_err(|e| match e {
            TrySendError::Full(_) => ChatLinkError::Transport("socket write buffer full".into()),
            TrySendError::Closed(_) => ChatLinkError::NotConnected,
        })
    }

    /// Resolves once the writer has room for one more frame; false if it
    /// has gone away. Owns its sender, so it can be awaited alongside
    /// [`Link::next_event`].
    pub fn writable(&self) -> impl Future<Output = bool> + Send + 'static {
        let frames = self.frames.clone();
        async move { frames.reserve().await.is_ok() }
    }

    /// Ask the socket to close. Returns false if the writer is already gone.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.frames
            .try_send(Frame::Close {
                code,
                reason: reason.to_string(),
            })
            .is_ok()
    }

    /// Next socket event; `None` once the socket task has ended.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

/// Opens sockets by URL.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<Link>;
}
