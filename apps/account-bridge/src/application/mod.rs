//! Application layer - Use cases and port definitions.

/// Port interfaces implemented by infrastructure adapters.
pub mod ports;

/// Session supervision and the per-client monitor tasks.
pub mod services;
