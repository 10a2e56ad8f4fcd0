//! Lightweight in-process metrics (dependency-free).
//!
//! Counters are stored as atomics, updated by the connection driver and
//! rendered on demand via `ConnectionManager::metrics().render()`.

pub mod metrics;

pub use metrics::ClientMetrics;
