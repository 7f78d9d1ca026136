//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper per-connection serving, dispatch by request shape)
//!     → forward.rs  absolute-URI requests: buffer → review → target →
//!                   review → client
//!     → connect.rs  CONNECT tunnels: review → direct splice or relayed
//!                   data frames
//!     origin-form requests reach the Axum router (manager upgrade path)
//! ```

pub mod connect;
pub mod forward;
pub mod server;

pub use server::ProxyServer;
