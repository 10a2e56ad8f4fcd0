//! Envelope (JSON text frame).
//!
//! Decoding goes through `RawEnvelope`, which keeps `payload` as `RawValue`
//! until the `type` discriminant is known. The payload is then parsed once
//! against the matching shape. A missing or `null` payload reads as `{}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::error::{ChatLinkError, Result};

use super::payload::{
    Body, ChatPayload, ErrorPayload, MessagePayload, Metadata, StreamChunk, TypingIndicator,
    TypingPayload,
};

/// Envelope discriminant (field name is `type` in JSON).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Chat,
    System,
    Status,
    Control,
    Typing,
    Error,
    Heartbeat,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Chat => "chat",
            MessageType::System => "system",
            MessageType::Status => "status",
            MessageType::Control => "control",
            MessageType::Typing => "typing",
            MessageType::Error => "error",
            MessageType::Heartbeat => "heartbeat",
        }
    }
}

/// Wire message. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct Envelope {
    id: String,
    timestamp: DateTime<Utc>,
    body: Body,
}

impl Envelope {
    /// New envelope with a fresh id, stamped now.
    pub fn new(body: Body) -> Self {
        Self::from_parts(Uuid::new_v4().to_string(), Utc::now(), body)
    }

    pub fn from_parts(id: impl Into<String>, timestamp: DateTime<Utc>, body: Body) -> Self {
        Self {
            id: id.into(),
            timestamp,
            body,
        }
    }

    pub fn chat(content: impl Into<String>, metadata: Option<Metadata>) -> Self {
        Self::new(Body::Chat(ChatPayload {
            content: Some(content.into()),
            metadata,
            ..ChatPayload::default()
        }))
    }

    pub fn heartbeat() -> Self {
        Self::new(Body::Heartbeat)
    }

    pub fn typing(is_typing: bool, session_id: &str, agent_id: &str) -> Self {
        Self::new(Body::Typing(TypingPayload {
            is_typing,
            metadata: Some(Metadata::for_session(session_id, agent_id)),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn kind(&self) -> MessageType {
        self.body.kind()
    }

    /// Streaming chunk carried by a `chat` envelope, if any.
    pub fn stream_chunk(&self) -> Option<StreamChunk> {
        match &self.body {
            Body::Chat(p) => p.chunk(),
            _ => None,
        }
    }

    pub fn typing_indicator(&self) -> Option<TypingIndicator> {
        match &self.body {
            Body::Typing(p) => Some(TypingIndicator::from(p)),
            _ => None,
        }
    }

    /// Parse one text frame.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ChatLinkError::Protocol(format!("invalid envelope json: {e}")))
    }

    /// Serialize to one text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ChatLinkError::Protocol(format!("envelope encode failed: {e}")))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvelope {
    id: String,
    #[serde(rename = "type")]
    kind: MessageType,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    payload: Option<Box<RawValue>>,
}

fn parse_payload<T: serde::de::DeserializeOwned>(kind: MessageType, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        ChatLinkError::Protocol(format!("invalid {} payload: {e}", kind.as_str()))
    })
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = ChatLinkError;

    fn try_from(raw: RawEnvelope) -> Result<Self> {
        if raw.id.is_empty() {
            return Err(ChatLinkError::Protocol("envelope id must not be empty".into()));
        }

        let payload = raw.payload.as_deref().map(RawValue::get).unwrap_or("{}");
        let body = match raw.kind {
            MessageType::Chat => Body::Chat(parse_payload(raw.kind, payload)?),
            MessageType::System => Body::System(parse_payload(raw.kind, payload)?),
            MessageType::Status => Body::Status(parse_payload(raw.kind, payload)?),
            MessageType::Control => Body::Control(parse_payload(raw.kind, payload)?),
            MessageType::Typing => Body::Typing(parse_payload(raw.kind, payload)?),
            MessageType::Error => Body::Error(parse_payload(raw.kind, payload)?),
            MessageType::Heartbeat => Body::Heartbeat,
        };

        Ok(Self {
            id: raw.id,
            timestamp: raw.timestamp,
            body,
        })
    }
}

// Borrowed mirror of the wire layout; serializing never clones the payload.
#[derive(Serialize)]
struct WireEnvelope<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: MessageType,
    timestamp: &'a DateTime<Utc>,
    payload: PayloadRef<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PayloadRef<'a> {
    Chat(&'a ChatPayload),
    Message(&'a MessagePayload),
    Typing(&'a TypingPayload),
    Error(&'a ErrorPayload),
    Empty(Empty),
}

#[derive(Serialize)]
struct Empty {}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let payload = match &self.body {
            Body::Chat(p) => PayloadRef::Chat(p),
            Body::System(p) | Body::Status(p) | Body::Control(p) => PayloadRef::Message(p),
            Body::Typing(p) => PayloadRef::Typing(p),
            Body::Error(p) => PayloadRef::Error(p),
            Body::Heartbeat => PayloadRef::Empty(Empty {}),
        };
        WireEnvelope {
            id: &self.id,
            kind: self.kind(),
            timestamp: &self.timestamp,
            payload,
        }
        .serialize(serializer)
    }
}
