//! WebSocket transport (tokio-tungstenite).
//!
//! Responsibilities:
//! - Dial the URL and split the socket
//! - One pump task per socket: outbound writer + inbound reader in a single `select!`
//! - Translate socket traffic into `TransportEvent`s
//! - Close handshake: after sending our close frame, wait at most `close_timeout`
//!   for the peer's reply, then report `Closed`

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use chatlink_core::error::{ChatLinkError, Result};

use crate::config::ClientSection;
use crate::transport::{
    Frame, Link, Transport, TransportEvent, ABNORMAL_CLOSURE, NORMAL_CLOSURE, NO_STATUS_RECEIVED,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const LINK_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct WsTransport {
    close_timeout: Duration,
}

impl WsTransport {
    pub fn new(close_timeout: Duration) -> Self {
        Self { close_timeout }
    }

    pub fn from_config(cfg: &ClientSection) -> Self {
        Self::new(cfg.close_timeout())
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<Link> {
        let (socket, _resp) = connect_async(url)
            .await
            .map_err(|e| ChatLinkError::Transport(format!("connect failed: {e}")))?;

        let (frame_tx, frame_rx) = mpsc::channel(LINK_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(LINK_BUFFER);
        tokio::spawn(run_pump(socket, frame_rx, event_tx, self.close_timeout));

        tracing::debug!(%url, "websocket open");
        Ok(Link::new(frame_tx, event_rx))
    }
}

async fn run_pump(
    socket: WsStream,
    mut frames: mpsc::Receiver<Frame>,
    events: mpsc::Sender<TransportEvent>,
    close_timeout: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (code, reason) = loop {
        tokio::select! {
            // outbound writer
            maybe_out = frames.recv() => {
                match maybe_out {
                    Some(Frame::Text(s)) => {
                        if let Err(e) = ws_tx.send(Message::Text(s)).await {
                            let _ = events.send(TransportEvent::Error(e.to_string())).await;
                            break (ABNORMAL_CLOSURE, format!("write failed: {e}"));
                        }
                    }
                    Some(Frame::Close { code, reason }) => {
                        send_close(&mut ws_tx, code, &reason).await;
                        await_close_reply(&mut ws_rx, close_timeout).await;
                        break (code, reason);
                    }
                    // link dropped by the manager: close quietly, nobody is listening
                    None => {
                        send_close(&mut ws_tx, NORMAL_CLOSURE, "").await;
                        return;
                    }
                }
            }

            // inbound reader
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(s))) => {
                        if events.send(TransportEvent::Message(s)).await.is_err() {
                            send_close(&mut ws_tx, NORMAL_CLOSURE, "").await;
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(b))) => {
                        tracing::debug!(len = b.len(), "binary frame ignored");
                    }
                    // tungstenite queues pong replies itself
                    Some(Ok(Message::Ping(_)))
                    | Some(Ok(Message::Pong(_)))
                    | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => break close_details(frame),
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        break (ABNORMAL_CLOSURE, e.to_string());
                    }
                    None => break (ABNORMAL_CLOSURE, "connection lost".to_string()),
                }
            }
        }
    };

    tracing::debug!(code, %reason, "websocket closed");
    let _ = events.send(TransportEvent::Closed { code, reason }).await;
}

async fn send_close(ws_tx: &mut SplitSink<WsStream, Message>, code: u16, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    };
    if let Err(e) = ws_tx.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "close frame not sent");
    }
}

async fn await_close_reply(ws_rx: &mut SplitStream<WsStream>, close_timeout: Duration) {
    let reply = tokio::time::timeout(close_timeout, async {
        while let Some(msg) = ws_rx.next().await {
            if let Ok(Message::Close(_)) | Err(_) = msg {
                break;
            }
        }
    })
    .await;

    if reply.is_err() {
        tracing::debug!("peer did not answer close frame in time");
    }
}

fn close_details(frame: Option<CloseFrame<'static>>) -> (u16, String) {
    match frame {
        Some(f) => (u16::from(f.code), f.reason.into_owned()),
        None => (NO_STATUS_RECEIVED, String::new()),
    }
}
