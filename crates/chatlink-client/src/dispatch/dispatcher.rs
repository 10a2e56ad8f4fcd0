use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use chatlink_core::error::ChatLinkError;
use chatlink_core::protocol::{Envelope, StreamChunk, TypingIndicator};

/// Connection lifecycle and inbound traffic listener.
///
/// Every method defaults to a no-op, so listeners implement only what they
/// consume. Calls come from the connection driver task, one at a time and in
/// transport order; implementations must not block.
pub trait EventHandler: Send + Sync {
    fn on_open(&self) {}
    fn on_close(&self, _code: u16, _reason: &str) {}
    fn on_error(&self, _error: &ChatLinkError) {}
    /// Any inbound envelope except heartbeat and typing.
    fn on_message(&self, _env: &Envelope) {}
    /// Called right before reconnect attempt `attempt` (1-based).
    fn on_reconnect(&self, _attempt: u32) {}
    fn on_typing(&self, _indicator: &TypingIndicator) {}
    /// Chunk-bearing `chat` envelopes, after `on_message`.
    fn on_stream_chunk(&self, _chunk: &StreamChunk) {}
}

/// Subscription token returned by [`Dispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Observer list for connection events.
pub struct Dispatcher {
    handlers: DashMap<u64, Arc<dyn EventHandler>>,
    next_id: AtomicU64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.insert(id, handler);
        HandlerId(id)
    }

    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.handlers.remove(&id.0).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    // Snapshot in subscription order; no shard lock is held while handlers
    // run, so a handler may subscribe or unsubscribe reentrantly.
    fn snapshot(&self) -> Vec<Arc<dyn EventHandler>> {
        let mut entries: Vec<(u64, Arc<dyn EventHandler>)> = self
            .handlers
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, h)| h).collect()
    }

    fn each(&self, f: impl Fn(&dyn EventHandler)) {
        for h in self.snapshot() {
            f(h.as_ref());
        }
    }

    pub fn emit_open(&self) {
        self.each(|h| h.on_open());
    }

    pub fn emit_close(&self, code: u16, reason: &str) {
        self.each(|h| h.on_close(code, reason));
    }

    pub fn emit_error(&self, error: &ChatLinkError) {
        self.each(|h| h.on_error(error));
    }

    pub fn emit_message(&self, env: &Envelope) {
        self.each(|h| h.on_message(env));
    }

    pub fn emit_reconnect(&self, attempt: u32) {
        self.each(|h| h.on_reconnect(attempt));
    }

    pub fn emit_typing(&self, indicator: &TypingIndicator) {
        self.each(|h| h.on_typing(indicator));
    }

    pub fn emit_stream_chunk(&self, chunk: &StreamChunk) {
        self.each(|h| h.on_stream_chunk(chunk));
    }
}
