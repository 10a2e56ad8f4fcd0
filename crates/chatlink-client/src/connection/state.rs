use chrono::{DateTime, Utc};

use chatlink_core::error::ChatLinkError;

/// Connection state machine phases.
///
/// `Idle -> Connecting -> Connected -> (Closing | Disconnected) -> Connecting -> ...`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closing,
    Disconnected,
}

/// Snapshot of the manager's connection state.
///
/// `connected` and `connecting` are derived from one phase, so they can
/// never both be true.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub error: Option<ChatLinkError>,
    pub retry_count: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.phase == ConnectionPhase::Connecting
    }
}
