//! chatlink client runtime.
//!
//! This crate wires the socket transport, the connection driver, the event
//! dispatcher and the two consumers of inbound traffic (streaming
//! reassembly and typing signals) into a client stack. It is consumed by
//! the demo binary (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod obs;
pub mod streaming;
pub mod timer;
pub mod transport;
pub mod typing;

pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionPhase, ConnectionState};
pub use dispatch::{EventHandler, HandlerId};
pub use streaming::{SharedAssembler, StreamAssembler, StreamingState};
pub use transport::ws::WsTransport;
pub use transport::Transport;
pub use typing::{TypingCoordinator, TypingSink};
