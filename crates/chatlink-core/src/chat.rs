//! UI-facing chat message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{Body, Envelope, Metadata, TrustLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

impl Role {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "agent" | "assistant" => Some(Role::Agent),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// Delivery status as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_level: Option<TrustLevel>,
    pub status: MessageStatus,
    pub is_streaming: bool,
}

impl ChatMessage {
    /// Outgoing user message, not yet handed to the socket.
    pub fn user(
        id: impl Into<String>,
        content: impl Into<String>,
        metadata: Option<&Metadata>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            role: Role::User,
            timestamp: Utc::now(),
            agent_id: metadata.and_then(|m| m.agent_id.clone()),
            session_id: metadata.and_then(|m| m.session_id.clone()),
            trust_level: None,
            status: MessageStatus::Sending,
            is_streaming: false,
        }
    }

    /// Empty agent message opened by the first chunk of a stream.
    pub fn streaming(message_id: impl Into<String>) -> Self {
        Self {
            id: message_id.into(),
            content: String::new(),
            role: Role::Agent,
            timestamp: Utc::now(),
            agent_id: None,
            session_id: None,
            trust_level: None,
            status: MessageStatus::Sending,
            is_streaming: true,
        }
    }

    /// Complete message from a non-streaming `chat` or `system` envelope.
    pub fn from_envelope(env: &Envelope) -> Option<Self> {
        let (content, metadata, default_role) = match env.body() {
            Body::Chat(p) if p.message_id.is_none() => {
                (p.content.clone()?, p.metadata.as_ref(), Role::Agent)
            }
            Body::System(p) => (p.content.clone()?, p.metadata.as_ref(), Role::System),
            _ => return None,
        };

        let role = metadata
            .and_then(|m| m.role.as_deref())
            .and_then(Role::parse)
            .unwrap_or(default_role);

        Some(Self {
            id: env.id().to_string(),
            content,
            role,
            timestamp: env.timestamp(),
            agent_id: metadata.and_then(|m| m.agent_id.clone()),
            session_id: metadata.and_then(|m| m.session_id.clone()),
            trust_level: metadata.and_then(|m| m.trust_level),
            status: MessageStatus::Delivered,
            is_streaming: false,
        })
    }
}
