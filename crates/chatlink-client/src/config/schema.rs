use std::time::Duration;

use serde::Deserialize;

use chatlink_core::error::{ChatLinkError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    pub client: ClientSection,

    #[serde(default)]
    pub reconnect: ReconnectSection,

    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub typing: TypingSection,

    #[serde(default)]
    pub streaming: StreamingSection,
}

impl ClientConfig {
    /// Default configuration for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            version: 1,
            client: ClientSection {
                url: url.into(),
                heartbeat_interval_ms: default_heartbeat_interval_ms(),
                close_timeout_ms: default_close_timeout_ms(),
            },
            reconnect: ReconnectSection::default(),
            queue: QueueSection::default(),
            typing: TypingSection::default(),
            streaming: StreamingSection::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ChatLinkError::UnsupportedVersion);
        }

        self.client.validate()?;
        self.reconnect.validate()?;
        self.queue.validate()?;
        self.typing.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    pub url: String,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl ClientSection {
    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ChatLinkError::Config(
                "client.url must start with ws:// or wss://".into(),
            ));
        }
        if !(1000..=300000).contains(&self.heartbeat_interval_ms) {
            return Err(ChatLinkError::Config(
                "client.heartbeat_interval_ms must be between 1000 and 300000".into(),
            ));
        }
        if !(100..=60000).contains(&self.close_timeout_ms) {
            return Err(ChatLinkError::Config(
                "client.close_timeout_ms must be between 100 and 60000".into(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    30000
}
fn default_close_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectSection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl ReconnectSection {
    pub fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(ChatLinkError::Config(
                "reconnect.base_delay_ms must be greater than 0".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ChatLinkError::Config(
                "reconnect.max_delay_ms must not be less than base_delay_ms".into(),
            ));
        }
        if self.max_retries > 100 {
            return Err(ChatLinkError::Config(
                "reconnect.max_retries must be at most 100".into(),
            ));
        }
        Ok(())
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30000
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSection {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl QueueSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=65536).contains(&self.capacity) {
            return Err(ChatLinkError::Config(
                "queue.capacity must be between 1 and 65536".into(),
            ));
        }
        Ok(())
    }
}

fn default_queue_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypingSection {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for TypingSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl TypingSection {
    pub fn validate(&self) -> Result<()> {
        if self.debounce_ms == 0 || self.idle_timeout_ms == 0 {
            return Err(ChatLinkError::Config(
                "typing.debounce_ms and typing.idle_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.idle_timeout_ms <= self.debounce_ms {
            return Err(ChatLinkError::Config(
                "typing.idle_timeout_ms must be greater than debounce_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

fn default_debounce_ms() -> u64 {
    500
}
fn default_idle_timeout_ms() -> u64 {
    3000
}

/// How the reassembler treats chunks that arrive out of `sequence` order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkOrdering {
    /// Append in arrival order; `sequence` is recorded but not consulted.
    #[default]
    Arrival,
    /// Buffer early chunks and append in `sequence` order.
    Sequence,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamingSection {
    #[serde(default)]
    pub ordering: ChunkOrdering,
}
