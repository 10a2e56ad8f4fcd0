//! Decode-once codec for inbound text frames.
//!
//! - Heartbeat => answered by the manager, never forwarded
//! - Typing => decoded into a `TypingIndicator`
//! - Everything else => the envelope, plus its stream chunk when present

use chatlink_core::error::Result;
use chatlink_core::protocol::{Body, Envelope, StreamChunk, TypingIndicator};

#[derive(Debug)]
pub enum Inbound {
    Heartbeat(Envelope),
    Typing(TypingIndicator),
    Message {
        env: Envelope,
        chunk: Option<StreamChunk>,
    },
}

pub fn decode(text: &str) -> Result<Inbound> {
    let env = Envelope::decode(text)?;
    Ok(match env.body() {
        Body::Heartbeat => Inbound::Heartbeat(env),
        Body::Typing(p) => Inbound::Typing(TypingIndicator::from(p)),
        _ => {
            let chunk = env.stream_chunk();
            Inbound::Message { env, chunk }
        }
    })
}
