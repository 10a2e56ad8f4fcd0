//! In-memory socket for driving the connection manager in tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use chatlink_client::transport::{Frame, Link, Transport, TransportEvent};
use chatlink_client::{ClientConfig, ConnectionManager, EventHandler};
use chatlink_core::error::{ChatLinkError, Result};
use chatlink_core::protocol::{Envelope, MessageType, StreamChunk, TypingIndicator};

pub const URL: &str = "ws://mock.test/chat";

/// Transport double: counts opens, can fail or delay them, and hands the
/// server side of each successful socket to the test.
pub struct MockTransport {
    opens: AtomicUsize,
    failures: AtomicUsize,
    open_delay: Mutex<Duration>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let t = Arc::new(Self {
            opens: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            open_delay: Mutex::new(Duration::ZERO),
            peers: tx,
        });
        (t, rx)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// The next `n` opens fail with a transport error.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn set_open_delay(&self, d: Duration) {
        *self.open_delay.lock().unwrap() = d;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _url: &str) -> Result<Link> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChatLinkError::Transport("connection refused".into()));
        }

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let _ = self.peers.send(MockPeer {
            frames: frame_rx,
            events: event_tx,
        });
        Ok(Link::new(frame_tx, event_rx))
    }
}

/// Server side of one mock socket.
pub struct MockPeer {
    frames: mpsc::Receiver<Frame>,
    events: mpsc::Sender<TransportEvent>,
}

impl MockPeer {
    pub async fn next_frame(&mut self) -> Frame {
        self.frames.recv().await.expect("socket dropped")
    }

    /// A frame already written, without waiting.
    pub fn try_frame(&mut self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }

    pub async fn next_envelope(&mut self) -> Envelope {
        match self.next_frame().await {
            Frame::Text(text) => Envelope::decode(&text).expect("client sent a valid envelope"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    pub async fn push(&self, env: &Envelope) {
        self.push_text(env.encode().unwrap()).await;
    }

    pub async fn push_text(&self, text: impl Into<String>) {
        self.events
            .send(TransportEvent::Message(text.into()))
            .await
            .expect("client gone");
    }

    /// Stop reading frames: the client's writer sees a closed socket
    /// while the event side stays up.
    pub fn close_writer(&mut self) {
        self.frames.close();
    }

    /// Server-side close (or an abrupt drop when `code` is 1006).
    pub async fn close(&self, code: u16) {
        let _ = self
            .events
            .send(TransportEvent::Closed {
                code,
                reason: String::new(),
            })
            .await;
    }
}

/// Event handler that records everything it sees as short strings.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
    reconnects: Mutex<Vec<(u32, Instant)>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn reconnects(&self) -> Vec<(u32, Instant)> {
        self.reconnects.lock().unwrap().clone()
    }

    fn push(&self, e: String) {
        self.events.lock().unwrap().push(e);
    }
}

impl EventHandler for Recorder {
    fn on_open(&self) {
        self.push("open".into());
    }
    fn on_close(&self, code: u16, _reason: &str) {
        self.push(format!("close:{code}"));
    }
    fn on_error(&self, error: &ChatLinkError) {
        self.push(format!("error:{}", error.code().as_str()));
    }
    fn on_message(&self, env: &Envelope) {
        self.push(format!("message:{}", env.kind().as_str()));
    }
    fn on_reconnect(&self, attempt: u32) {
        self.push(format!("reconnect:{attempt}"));
        self.reconnects.lock().unwrap().push((attempt, Instant::now()));
    }
    fn on_typing(&self, indicator: &TypingIndicator) {
        self.push(format!("typing:{}", indicator.is_typing));
    }
    fn on_stream_chunk(&self, chunk: &StreamChunk) {
        self.push(format!("chunk:{}:{}", chunk.message_id, chunk.sequence));
    }
}

pub fn manager(transport: Arc<MockTransport>) -> (ConnectionManager, Arc<Recorder>) {
    let mgr = ConnectionManager::new(ClientConfig::new(URL), transport);
    let rec = Arc::new(Recorder::default());
    mgr.subscribe(rec.clone());
    (mgr, rec)
}

/// Let the driver drain its pending work (the paused clock barely moves).
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn is_heartbeat(frame: &Frame) -> bool {
    match frame {
        Frame::Text(text) => Envelope::decode(text)
            .map(|e| e.kind() == MessageType::Heartbeat)
            .unwrap_or(false),
        Frame::Close { .. } => false,
    }
}
