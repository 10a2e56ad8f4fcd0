//! Typing Signal Coordinator.

pub mod coordinator;

pub use coordinator::{TypingCoordinator, TypingSink};
