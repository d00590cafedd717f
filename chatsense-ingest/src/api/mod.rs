//! HTTP control surface
//!
//! Mirrors the operator console: join, leave, and switch channels, read the
//! session and pipeline status, and follow status events over SSE.

pub mod health;
pub mod session;
pub mod sse;

pub use health::health_routes;
pub use session::session_routes;
pub use sse::event_stream;
