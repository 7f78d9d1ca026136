//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → Hand off to the HTTP layer (per-connection service)
//! ```

pub mod listener;

pub use listener::{ConnectionPermit, Listener, ListenerError};
