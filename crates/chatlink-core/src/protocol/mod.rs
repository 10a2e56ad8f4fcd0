//! Wire protocol: JSON envelopes with one typed payload per message type.
//!
//! All parsers are panic-free: malformed input is reported as
//! `ChatLinkError::Protocol` so the transport can log and drop the frame
//! instead of tearing down the handler chain.

pub mod envelope;
pub mod payload;

pub use envelope::{Envelope, MessageType};
pub use payload::{
    Body, ChatPayload, Context, ErrorDetail, ErrorPayload, MessagePayload, Metadata, StreamChunk,
    TrustLevel, TypingIndicator, TypingPayload,
};
