//! Payload shapes, one per envelope type.
//!
//! Field names follow the wire (camelCase). Unknown payload fields are
//! ignored so older clients keep working when the server adds fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::envelope::MessageType;

/// Free-form key/value context attached to a message.
pub type Context = Map<String, Value>;

/// Ordinal describing how autonomously an agent may act.
pub type TrustLevel = u8;

/// Routing and authorship metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_level: Option<TrustLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Metadata {
    pub fn for_session(session_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

/// `chat` payload. Carries plain content or one streaming chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Logical chat message this chunk belongs to (not the envelope id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ChatPayload {
    /// Streaming view of this payload; `None` for plain messages.
    pub fn chunk(&self) -> Option<StreamChunk> {
        let message_id = self.message_id.clone()?;
        Some(StreamChunk {
            message_id,
            delta: self.delta.clone().unwrap_or_default(),
            sequence: self.sequence.unwrap_or(0),
            is_final: self.is_final.unwrap_or(false),
            trust_level: self.metadata.as_ref().and_then(|m| m.trust_level),
        })
    }
}

/// `system`, `status` and `control` payloads share this shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// `typing` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(default)]
    pub is_typing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Error description carried by `error` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// `error` payload. `messageId` names the stream that failed, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error: ErrorDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Typed envelope body: the `type` discriminant selects the payload shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Chat(ChatPayload),
    System(MessagePayload),
    Status(MessagePayload),
    Control(MessagePayload),
    Typing(TypingPayload),
    Error(ErrorPayload),
    Heartbeat,
}

impl Body {
    pub fn kind(&self) -> MessageType {
        match self {
            Body::Chat(_) => MessageType::Chat,
            Body::System(_) => MessageType::System,
            Body::Status(_) => MessageType::Status,
            Body::Control(_) => MessageType::Control,
            Body::Typing(_) => MessageType::Typing,
            Body::Error(_) => MessageType::Error,
            Body::Heartbeat => MessageType::Heartbeat,
        }
    }

    /// Metadata block, whichever payload carries it.
    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Body::Chat(p) => p.metadata.as_ref(),
            Body::System(p) | Body::Status(p) | Body::Control(p) => p.metadata.as_ref(),
            Body::Typing(p) => p.metadata.as_ref(),
            Body::Error(p) => p.metadata.as_ref(),
            Body::Heartbeat => None,
        }
    }
}

/// One incremental streaming update for a logical chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub message_id: String,
    pub delta: String,
    pub sequence: u64,
    pub is_final: bool,
    pub trust_level: Option<TrustLevel>,
}

/// Remote typing state, decoded from a `typing` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingIndicator {
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub is_typing: bool,
}

impl From<&TypingPayload> for TypingIndicator {
    fn from(p: &TypingPayload) -> Self {
        let meta = p.metadata.as_ref();
        Self {
            agent_id: meta.and_then(|m| m.agent_id.clone()),
            session_id: meta.and_then(|m| m.session_id.clone()),
            is_typing: p.is_typing,
        }
    }
}
