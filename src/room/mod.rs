//! Room lifecycle and message relay
//!
//! The core of the server: the registry of active rooms, the two-slot room
//! model, and the per-connection relay loop.

mod registry;
mod relay;

pub use registry::*;
pub use relay::run_relay;
