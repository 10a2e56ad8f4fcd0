//! Connection Manager.
//!
//! `ConnectionManager` is a cloneable handle. All state lives in one driver
//! task that owns the socket link, the connection state, the outbound queue
//! and every timer (heartbeat interval, reconnect sleep). Handle methods only
//! enqueue commands and return immediately; outcomes arrive through the
//! state watch channel and the registered [`EventHandler`]s.
//!
//! Lifecycle:
//! - connect: no-op while connecting/connected, otherwise dial in the background
//! - open: reset retries, start heartbeat, flush the queue (FIFO), `on_open`
//! - close: stop heartbeat, `on_close`, then maybe schedule a reconnect
//! - disconnect: exhaust the retry budget, stop timers, close with 1000

use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};

use chatlink_core::error::{ChatLinkError, ErrorCode, Result};
use chatlink_core::protocol::{Envelope, MessageType, Metadata};

use crate::config::ClientConfig;
use crate::connection::backoff::Backoff;
use crate::connection::queue::OutboundQueue;
use crate::connection::state::{ConnectionPhase, ConnectionState};
use crate::dispatch::{Dispatcher, EventHandler, HandlerId};
use crate::obs::ClientMetrics;
use crate::timer::ScopedTask;
use crate::transport::codec::{self, Inbound};
use crate::transport::{Link, Transport, TransportEvent, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use crate::typing::TypingSink;

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send(Envelope),
}

/// Handle to one connection driver.
///
/// Cloning is cheap; the driver stops (closing the socket with 1000) once
/// every handle is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<ClientMetrics>,
}

impl ConnectionManager {
    /// Build a manager and spawn its driver. Must run inside a tokio runtime.
    pub fn new(cfg: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new());
        let metrics = Arc::new(ClientMetrics::default());

        let driver = Driver {
            backoff: Backoff::from_config(&cfg.reconnect),
            stopped: false,
            queue: OutboundQueue::new(cfg.queue.capacity),
            cfg,
            transport,
            commands: cmd_rx,
            attempt_tx,
            attempt_rx,
            attempt: None,
            generation: 0,
            link: None,
            heartbeat: None,
            reconnect_at: None,
            state: ConnectionState::default(),
            state_tx,
            dispatcher: Arc::clone(&dispatcher),
            metrics: Arc::clone(&metrics),
        };
        tokio::spawn(driver.run());

        Self {
            commands: cmd_tx,
            state: state_rx,
            dispatcher,
            metrics,
        }
    }

    fn command(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            tracing::debug!("connection driver stopped; command dropped");
        }
    }

    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Transmit now if the socket is open, otherwise queue.
    pub fn send(&self, env: Envelope) {
        self.command(Command::Send(env));
    }

    /// Returns the envelope id, usable as the UI message id.
    pub fn send_chat_message(
        &self,
        content: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> String {
        let env = Envelope::chat(content, metadata);
        let id = env.id().to_string();
        self.send(env);
        id
    }

    pub fn send_typing_indicator(&self, is_typing: bool, session_id: &str, agent_id: &str) {
        self.send(Envelope::typing(is_typing, session_id, agent_id));
    }

    /// Current connection state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        self.dispatcher.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }
}

impl TypingSink for ConnectionManager {
    fn send_typing(&self, is_typing: bool, session_id: &str, agent_id: &str) {
        self.send_typing_indicator(is_typing, session_id, agent_id);
    }
}

struct AttemptResult {
    generation: u64,
    result: Result<Link>,
}

enum Wake {
    Command(Command),
    Attempt(AttemptResult),
    Transport(Option<TransportEvent>),
    Heartbeat,
    Reconnect,
    Writable,
    Shutdown,
}

struct Driver {
    cfg: ClientConfig,
    transport: Arc<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    attempt_tx: mpsc::UnboundedSender<AttemptResult>,
    attempt_rx: mpsc::UnboundedReceiver<AttemptResult>,
    attempt: Option<ScopedTask>,
    generation: u64,
    link: Option<Link>,
    heartbeat: Option<Interval>,
    reconnect_at: Option<Pin<Box<Sleep>>>,
    queue: OutboundQueue,
    backoff: Backoff,
    /// Set by `disconnect()` until the next `connect()`.
    stopped: bool,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<ClientMetrics>,
}

async fn next_event(link: &mut Option<Link>) -> Option<TransportEvent> {
    match link {
        Some(l) => l.next_event().await,
        None => pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(iv) => {
            iv.tick().await;
        }
        None => pending().await,
    }
}

async fn when_writable(ready: Option<impl Future<Output = bool>>) {
    if let Some(ready) = ready {
        if ready.await {
            return;
        }
    }
    pending().await
}

async fn fire(reconnect_at: &mut Option<Pin<Box<Sleep>>>) {
    match reconnect_at {
        Some(s) => s.as_mut().await,
        None => pending().await,
    }
}

impl Driver {
    async fn run(mut self) {
        tracing::debug!(url = %self.cfg.client.url, "connection driver started");
        loop {
            // Only watched while queued envelopes are stuck behind a full writer.
            let writable = match &self.link {
                Some(l) if self.state.is_connected() && !self.queue.is_empty() => {
                    Some(l.writable())
                }
                _ => None,
            };
            let wake = tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(c) => Wake::Command(c),
                    None => Wake::Shutdown,
                },
                Some(res) = self.attempt_rx.recv() => Wake::Attempt(res),
                ev = next_event(&mut self.link) => Wake::Transport(ev),
                _ = tick(&mut self.heartbeat) => Wake::Heartbeat,
                _ = fire(&mut self.reconnect_at) => Wake::Reconnect,
                _ = when_writable(writable) => Wake::Writable,
            };

            match wake {
                Wake::Command(Command::Connect) => self.connect(true),
                Wake::Command(Command::Disconnect) => self.disconnect(),
                Wake::Command(Command::Send(env)) => self.send(env),
                Wake::Attempt(res) => self.on_attempt(res),
                Wake::Transport(Some(TransportEvent::Message(text))) => self.on_inbound(&text),
                Wake::Transport(Some(TransportEvent::Error(msg))) => {
                    self.on_transport_error(ChatLinkError::Transport(msg))
                }
                Wake::Transport(Some(TransportEvent::Closed { code, reason })) => {
                    self.on_closed(code, &reason)
                }
                Wake::Transport(None) => self.on_closed(ABNORMAL_CLOSURE, "transport ended"),
                Wake::Heartbeat => {
                    self.flush_queue();
                    self.send_heartbeat();
                }
                Wake::Reconnect => self.on_reconnect_due(),
                Wake::Writable => self.flush_queue(),
                Wake::Shutdown => break,
            }
        }

        if let Some(link) = self.link.take() {
            link.close(NORMAL_CLOSURE, "client dropped");
        }
        tracing::debug!("connection driver stopped");
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    fn connect(&mut self, external: bool) {
        match self.state.phase {
            ConnectionPhase::Connecting | ConnectionPhase::Connected => {
                tracing::debug!(phase = ?self.state.phase, "connect ignored");
                return;
            }
            ConnectionPhase::Closing => {
                // abandon the closing socket; its events are no longer read
                self.link = None;
            }
            ConnectionPhase::Idle | ConnectionPhase::Disconnected => {}
        }

        if external {
            self.state.retry_count = 0;
            self.reconnect_at = None;
        }
        self.stopped = false;

        self.generation += 1;
        self.state.phase = ConnectionPhase::Connecting;
        self.state.error = None;
        self.publish();
        self.metrics.connect_attempts.inc(&[]);

        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let url = self.cfg.client.url.clone();
        let tx = self.attempt_tx.clone();
        tracing::info!(%url, generation, "connecting");

        self.attempt = Some(ScopedTask::spawn(async move {
            let result = transport.open(&url).await;
            let _ = tx.send(AttemptResult { generation, result });
        }));
    }

    fn on_attempt(&mut self, res: AttemptResult) {
        if res.generation != self.generation || self.state.phase != ConnectionPhase::Connecting {
            if let Ok(link) = res.result {
                tracing::debug!(generation = res.generation, "closing superseded socket");
                link.close(NORMAL_CLOSURE, "superseded");
            }
            return;
        }
        self.attempt = None;

        match res.result {
            Ok(link) => self.on_open(link),
            Err(e) => {
                tracing::warn!(error = %e, "connect failed");
                self.on_transport_error(e);
                self.on_closed(ABNORMAL_CLOSURE, "connect failed");
            }
        }
    }

    fn on_open(&mut self, link: Link) {
        self.link = Some(link);
        self.state.phase = ConnectionPhase::Connected;
        self.state.retry_count = 0;
        self.state.last_connected_at = Some(Utc::now());
        self.reconnect_at = None;

        let every = self.cfg.client.heartbeat_interval();
        let mut hb = interval_at(Instant::now() + every, every);
        hb.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(hb);

        self.publish();
        tracing::info!(url = %self.cfg.client.url, queued = self.queue.len(), "connected");

        self.flush_queue();
        self.dispatcher.emit_open();
    }

    fn on_transport_error(&mut self, err: ChatLinkError) {
        tracing::warn!(error = %err, "transport error");
        self.state.error = Some(err.clone());
        self.publish();
        self.dispatcher.emit_error(&err);
    }

    fn on_closed(&mut self, code: u16, reason: &str) {
        self.link = None;
        self.heartbeat = None;
        self.state.phase = ConnectionPhase::Disconnected;
        self.publish();
        tracing::info!(code, %reason, "connection closed");

        self.dispatcher.emit_close(code, reason);

        if code == NORMAL_CLOSURE || self.stopped {
            return;
        }
        if self.state.retry_count < self.cfg.reconnect.max_retries {
            self.schedule_reconnect();
        } else {
            let err = ChatLinkError::RetriesExhausted {
                attempts: self.state.retry_count,
            };
            tracing::warn!(
                retries = self.state.retry_count,
                "reconnect attempts exhausted; waiting for an explicit connect"
            );
            self.state.error = Some(err.clone());
            self.publish();
            self.dispatcher.emit_error(&err);
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            return;
        }
        self.state.retry_count += 1;
        let delay = self.backoff.delay(self.state.retry_count);
        self.reconnect_at = Some(Box::pin(sleep(delay)));
        self.metrics.reconnects_scheduled.inc(&[]);
        self.publish();
        tracing::info!(
            attempt = self.state.retry_count,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
    }

    fn on_reconnect_due(&mut self) {
        self.reconnect_at = None;
        self.dispatcher.emit_reconnect(self.state.retry_count);
        self.connect(false);
    }

    fn disconnect(&mut self) {
        self.stopped = true;
        self.state.retry_count = self.cfg.reconnect.max_retries;
        self.reconnect_at = None;
        self.heartbeat = None;
        self.attempt = None;
        self.generation += 1;

        let closing = match &self.link {
            Some(link) => link.close(NORMAL_CLOSURE, "client disconnect"),
            None => false,
        };

        if closing {
            self.state.phase = ConnectionPhase::Closing;
            self.publish();
            tracing::info!("disconnecting");
        } else if self.link.is_some() {
            self.on_closed(NORMAL_CLOSURE, "client disconnect");
        } else if self.state.phase != ConnectionPhase::Idle {
            self.state.phase = ConnectionPhase::Disconnected;
            self.publish();
        }
    }

    fn transmit(&self, env: &Envelope) -> Result<()> {
        if self.state.phase != ConnectionPhase::Connected {
            return Err(ChatLinkError::NotConnected);
        }
        let link = self
            .link
            .as_ref()
            .filter(|l| l.is_open())
            .ok_or(ChatLinkError::NotConnected)?;
        link.send_text(env.encode()?)?;
        self.metrics.frames_out.inc(&[("type", env.kind().as_str())]);
        Ok(())
    }

    fn send(&mut self, env: Envelope) {
        if env.kind() == MessageType::Heartbeat {
            self.send_heartbeat_envelope(env);
            return;
        }

        if !self.queue.is_empty() {
            // Earlier envelopes are still waiting: go behind them.
            self.enqueue(env);
            self.flush_queue();
            return;
        }

        match self.transmit(&env) {
            Ok(()) => {}
            Err(e) if e.code() == ErrorCode::Protocol => {
                tracing::warn!(error = %e, id = %env.id(), "dropping unencodable envelope");
            }
            Err(e) => {
                tracing::debug!(reason = %e, id = %env.id(), "queued for later");
                self.enqueue(env);
            }
        }
    }

    fn enqueue(&mut self, env: Envelope) {
        if let Some(dropped) = self.queue.push(env) {
            tracing::warn!(
                id = %dropped.id(),
                kind = dropped.kind().as_str(),
                capacity = self.cfg.queue.capacity,
                "outbound queue full; dropped oldest"
            );
            self.metrics.queue_dropped.inc(&[("type", dropped.kind().as_str())]);
        }
        self.metrics.queue_depth.set(self.queue.len() as i64);
    }

    fn flush_queue(&mut self) {
        if !self.state.is_connected() {
            return;
        }
        while let Some(env) = self.queue.pop_front() {
            match self.transmit(&env) {
                Ok(()) => {}
                Err(e) if e.code() == ErrorCode::Protocol => {
                    tracing::warn!(error = %e, id = %env.id(), "dropping unencodable envelope");
                }
                Err(e) => {
                    tracing::debug!(
                        reason = %e,
                        remaining = self.queue.len() + 1,
                        "flush interrupted"
                    );
                    self.queue.requeue_front(env);
                    break;
                }
            }
        }
        self.metrics.queue_depth.set(self.queue.len() as i64);
    }

    // Heartbeats are never queued: skipped while disconnected.
    fn send_heartbeat_envelope(&self, env: Envelope) {
        match self.transmit(&env) {
            Ok(()) => self.metrics.heartbeats.inc(&[("dir", "out")]),
            Err(e) => tracing::debug!(reason = %e, "heartbeat skipped"),
        }
    }

    fn send_heartbeat(&self) {
        self.send_heartbeat_envelope(Envelope::heartbeat());
    }

    fn on_inbound(&mut self, text: &str) {
        let inbound = match codec::decode(text) {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "dropping malformed envelope");
                self.metrics.decode_errors.inc(&[]);
                return;
            }
        };

        match inbound {
            Inbound::Heartbeat(env) => {
                self.metrics.frames_in.inc(&[("type", env.kind().as_str())]);
                self.metrics.heartbeats.inc(&[("dir", "in")]);
                self.send_heartbeat();
            }
            Inbound::Typing(indicator) => {
                self.metrics.frames_in.inc(&[("type", "typing")]);
                self.dispatcher.emit_typing(&indicator);
            }
            Inbound::Message { env, chunk } => {
                self.metrics.frames_in.inc(&[("type", env.kind().as_str())]);
                self.dispatcher.emit_message(&env);
                if let Some(chunk) = chunk {
                    self.dispatcher.emit_stream_chunk(&chunk);
                }
            }
        }
    }
}
