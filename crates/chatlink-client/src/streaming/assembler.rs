use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use chatlink_core::chat::{ChatMessage, MessageStatus};
use chatlink_core::protocol::StreamChunk;

use crate::config::ChunkOrdering;

/// Progress of one in-flight streamed message.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingState {
    pub message_id: String,
    /// Accumulated text so far.
    pub content: String,
    /// Sequence number of the last applied chunk.
    pub sequence: u64,
    pub is_complete: bool,
    pub started_at: DateTime<Utc>,
    // Sequence ordering only.
    next_sequence: u64,
    pending: BTreeMap<u64, StreamChunk>,
}

impl StreamingState {
    fn new(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            content: String::new(),
            sequence: 0,
            is_complete: false,
            started_at: Utc::now(),
            next_sequence: 0,
            pending: BTreeMap::new(),
        }
    }

    fn append(&mut self, chunk: &StreamChunk) {
        self.content.push_str(&chunk.delta);
        self.sequence = chunk.sequence;
    }

    /// Number of chunks buffered ahead of a sequence gap.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Reassembles chunk events into chat messages.
///
/// Holds the conversation's message list (streamed and directly appended
/// messages, in insertion order) plus the live set of streams that have not
/// seen their final chunk.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    ordering: ChunkOrdering,
    messages: Vec<ChatMessage>,
    index: HashMap<String, usize>,
    live: HashMap<String, StreamingState>,
    finished: HashSet<String>,
    failed: HashSet<String>,
}

impl StreamAssembler {
    pub fn new(ordering: ChunkOrdering) -> Self {
        Self {
            ordering,
            ..Self::default()
        }
    }

    /// Apply one chunk. Returns the finished message when this chunk
    /// completed its stream.
    pub fn apply_chunk(&mut self, chunk: &StreamChunk) -> Option<ChatMessage> {
        let id = chunk.message_id.as_str();

        if self.finished.contains(id) {
            tracing::debug!(
                message_id = %id,
                sequence = chunk.sequence,
                "chunk after final ignored"
            );
            return None;
        }

        if !self.live.contains_key(id) {
            tracing::debug!(message_id = %id, "stream started");
        }
        let state = self
            .live
            .entry(id.to_string())
            .or_insert_with(|| StreamingState::new(id));

        match self.ordering {
            ChunkOrdering::Arrival => state.append(chunk),
            ChunkOrdering::Sequence => {
                let seen = chunk.sequence < state.next_sequence
                    || state.pending.contains_key(&chunk.sequence);
                if seen && !chunk.is_final {
                    tracing::debug!(
                        message_id = %id,
                        sequence = chunk.sequence,
                        "duplicate chunk dropped"
                    );
                    return None;
                }
                // A final chunk always completes, even when its sequence repeats.
                if !seen {
                    state.pending.insert(chunk.sequence, chunk.clone());
                }
                while let Some(next) = state.pending.remove(&state.next_sequence) {
                    state.append(&next);
                    state.next_sequence += 1;
                }
                if chunk.is_final && !state.pending.is_empty() {
                    tracing::warn!(
                        message_id = %id,
                        expected = state.next_sequence,
                        buffered = state.pending.len(),
                        "final chunk arrived with gaps; flushing buffered chunks"
                    );
                    for (_, rest) in std::mem::take(&mut state.pending) {
                        state.append(&rest);
                    }
                }
            }
        }

        let content = state.content.clone();
        if chunk.is_final {
            state.is_complete = true;
        }

        let pos = self.upsert(id, content, chunk);

        if chunk.is_final {
            self.live.remove(id);
            self.finished.insert(id.to_string());
            tracing::debug!(message_id = %id, live = self.live.len(), "stream complete");
            Some(self.messages[pos].clone())
        } else {
            None
        }
    }

    fn upsert(&mut self, id: &str, content: String, chunk: &StreamChunk) -> usize {
        let pos = match self.index.get(id) {
            Some(&pos) => pos,
            None => {
                self.messages.push(ChatMessage::streaming(id));
                let pos = self.messages.len() - 1;
                self.index.insert(id.to_string(), pos);
                pos
            }
        };

        let msg = &mut self.messages[pos];
        msg.content = content;
        msg.is_streaming = !chunk.is_final;
        msg.status = if chunk.is_final {
            MessageStatus::Delivered
        } else {
            MessageStatus::Sending
        };
        if chunk.trust_level.is_some() {
            msg.trust_level = chunk.trust_level;
        }
        pos
    }

    /// Mark a stream as failed: status `failed`, no longer streaming, live
    /// state dropped. Returns true the first time a given message fails.
    pub fn handle_stream_error(&mut self, message_id: &str) -> bool {
        if let Some(&pos) = self.index.get(message_id) {
            let msg = &mut self.messages[pos];
            msg.status = MessageStatus::Failed;
            msg.is_streaming = false;
        }
        self.live.remove(message_id);
        self.finished.insert(message_id.to_string());
        self.failed.insert(message_id.to_string())
    }

    /// Append (or replace by id) a message that did not come from a stream.
    pub fn append_message(&mut self, msg: ChatMessage) {
        match self.index.get(&msg.id) {
            Some(&pos) => self.messages[pos] = msg,
            None => {
                self.index.insert(msg.id.clone(), self.messages.len());
                self.messages.push(msg);
            }
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.index.get(id).map(|&pos| &self.messages[pos])
    }

    /// True while any stream is live.
    pub fn is_streaming(&self) -> bool {
        !self.live.is_empty()
    }

    pub fn is_message_streaming(&self, id: &str) -> bool {
        self.live.contains_key(id)
    }

    pub fn streaming_state(&self, id: &str) -> Option<&StreamingState> {
        self.live.get(id)
    }

    /// Forget every message and stream (conversation switch).
    pub fn clear(&mut self) {
        self.messages.clear();
        self.index.clear();
        self.live.clear();
        self.finished.clear();
        self.failed.clear();
    }
}
