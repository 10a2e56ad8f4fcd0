//! Streaming Reassembler.
//!
//! [`StreamAssembler`] is the plain state machine. [`SharedAssembler`] wraps
//! it for use from the connection driver: subscribe it as an
//! [`EventHandler`] and it consumes chunk events and `error` envelopes that
//! name a failed stream. Callbacks run after the internal lock is released,
//! so they may query the assembler again.

pub mod assembler;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatlink_core::chat::ChatMessage;
use chatlink_core::error::ChatLinkError;
use chatlink_core::protocol::{Body, Envelope, StreamChunk};

use crate::config::ChunkOrdering;
use crate::dispatch::EventHandler;

pub use assembler::{StreamAssembler, StreamingState};

type CompleteFn = dyn Fn(&ChatMessage) + Send + Sync;
type ErrorFn = dyn Fn(&str, &ChatLinkError) + Send + Sync;

/// Cloneable, thread-safe handle to one [`StreamAssembler`].
#[derive(Clone)]
pub struct SharedAssembler {
    inner: Arc<Mutex<StreamAssembler>>,
    on_complete: Option<Arc<CompleteFn>>,
    on_error: Option<Arc<ErrorFn>>,
}

impl SharedAssembler {
    pub fn new(ordering: ChunkOrdering) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StreamAssembler::new(ordering))),
            on_complete: None,
            on_error: None,
        }
    }

    /// Called with the finished message whenever a stream completes.
    pub fn with_on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Called once per failed message with its id and the error.
    pub fn with_on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &ChatLinkError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    fn lock(&self) -> MutexGuard<'_, StreamAssembler> {
        // a panicking callback never runs under this lock, so the state is intact
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply_chunk(&self, chunk: &StreamChunk) -> Option<ChatMessage> {
        let done = self.lock().apply_chunk(chunk);
        if let (Some(msg), Some(cb)) = (&done, &self.on_complete) {
            cb(msg);
        }
        done
    }

    pub fn handle_stream_error(&self, message_id: &str, error: &ChatLinkError) {
        let first = self.lock().handle_stream_error(message_id);
        if !first {
            tracing::debug!(%message_id, "stream already failed");
            return;
        }
        tracing::warn!(%message_id, error = %error, "stream failed");
        if let Some(cb) = &self.on_error {
            cb(message_id, error);
        }
    }

    pub fn append_message(&self, msg: ChatMessage) {
        self.lock().append_message(msg);
    }

    /// Snapshot of the message list.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages().to_vec()
    }

    pub fn message(&self, id: &str) -> Option<ChatMessage> {
        self.lock().message(id).cloned()
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().is_streaming()
    }

    pub fn is_message_streaming(&self, id: &str) -> bool {
        self.lock().is_message_streaming(id)
    }

    pub fn streaming_state(&self, id: &str) -> Option<StreamingState> {
        self.lock().streaming_state(id).cloned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl EventHandler for SharedAssembler {
    fn on_message(&self, env: &Envelope) {
        if let Body::Error(p) = env.body() {
            if let Some(message_id) = &p.message_id {
                let err = ChatLinkError::Stream {
                    message_id: message_id.clone(),
                    reason: format!("{}: {}", p.error.code, p.error.message),
                };
                self.handle_stream_error(message_id, &err);
            }
        }
    }

    fn on_stream_chunk(&self, chunk: &StreamChunk) {
        self.apply_chunk(chunk);
    }
}
