//! Top-level facade crate for chatlink.
//!
//! Re-exports the wire contracts and the client runtime so users can depend on a single crate.

pub mod core {
    pub use chatlink_core::*;
}

pub mod client {
    pub use chatlink_client::*;
}
