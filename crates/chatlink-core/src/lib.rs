//! chatlink core: transport-agnostic wire contracts and chat types.
//!
//! This crate defines the envelope codec, the typed payloads and the error
//! surface shared by the client runtime and its collaborators. It carries no
//! transport or runtime dependencies so UI layers can depend on it alone.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths surface as `ChatLinkError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod chat;
pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ChatLinkError, ErrorCode, Result};
