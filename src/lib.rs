//! Intercepting HTTP/HTTPS proxy relay.
//!
//! A forward proxy built with Tokio, hyper, and Axum. Instead of dialing
//! targets on its own authority, the relay forwards every request through a
//! persistent WebSocket control channel to an external manager, which may
//! inspect, modify, approve, or reject requests and responses. CONNECT
//! tunnels are either spliced directly to the target after approval or
//! relayed byte-for-byte over the control channel, multiplexed by
//! connection id.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────┐
//!                  │                     RELAY                        │
//!   Client         │  ┌─────────┐   ┌──────────┐   ┌──────────────┐  │
//!   ───────────────┼─▶│   net   │──▶│  http    │──▶│ forward /    │──┼──▶ Target
//!                  │  │listener │   │ dispatch │   │ connect      │  │
//!                  │  └─────────┘   └──────────┘   └──────┬───────┘  │
//!                  │                                      │ review   │
//!                  │                               ┌──────▼───────┐  │
//!   Manager        │  ┌─────────┐   ┌─────────┐    │   manager    │  │
//!   ◀──────────────┼──│  gate   │──▶│ channel │◀──▶│ pending +    │  │
//!    (WebSocket)   │  └─────────┘   └─────────┘    │ registry     │  │
//!                  │                               └──────────────┘  │
//!                  └──────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod manager;
pub mod net;
pub mod relay;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::RelayConfig;
pub use error::RelayError;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
pub use relay::Relay;
