//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Initialize tracing/metrics → Bind listener → Serve
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C → stop accepting → process exit ends remaining work
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
