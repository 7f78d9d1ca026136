//! Manager control-channel subsystem.
//!
//! # Data Flow
//! ```text
//! manager WebSocket upgrade
//!     → gate.rs (token check)
//!     → channel.rs (install, writer task, inbound dispatch, keepalive)
//!         → pending.rs (review RPC waiters)
//!         → registry.rs (relayed CONNECT tunnels)
//!     frames.rs defines the wire records for all of the above
//! ```

pub mod channel;
pub mod frames;
pub mod gate;
pub mod pending;
pub mod registry;

pub use channel::{ChannelHandle, ManagerSlot};
pub use frames::{ControlFrame, Decision, DecisionAction, Modified};
pub use pending::PendingDecisions;
pub use registry::{ConnectionRegistry, TunnelCommand};
