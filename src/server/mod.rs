//! HTTP + WebSocket server module
//!
//! Serves the landing and room pages, the room-creation endpoint, and the
//! WebSocket relay endpoint on a single port.

mod routes;
mod ws;

pub use routes::*;
pub use ws::*;
