use std::collections::VecDeque;

use chatlink_core::protocol::Envelope;

/// Outbound envelopes waiting for an open socket.
///
/// Bounded FIFO: pushing onto a full queue evicts the oldest entry and
/// returns it so the caller can log the drop.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<Envelope>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, env: Envelope) -> Option<Envelope> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(env);
        evicted
    }

    /// Put back an entry whose transmission failed; it stays first in line.
    pub fn requeue_front(&mut self, env: Envelope) {
        self.items.push_front(env);
        if self.items.len() > self.capacity {
            self.items.pop_back();
        }
    }

    pub fn pop_front(&mut self) -> Option<Envelope> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
