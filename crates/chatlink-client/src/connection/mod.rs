//! Connection management: state machine, reconnect backoff, outbound queue
//! and the driver task that ties them to a socket.

pub mod backoff;
pub mod manager;
pub mod queue;
pub mod state;

pub use backoff::Backoff;
pub use manager::ConnectionManager;
pub use queue::OutboundQueue;
pub use state::{ConnectionPhase, ConnectionState};
