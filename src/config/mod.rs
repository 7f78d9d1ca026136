//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! process environment
//!     → loader.rs (per-variable parsing + semantic validation)
//!     → RelayConfig (validated, immutable)
//!     → carried by the Relay value to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults so only MANAGER_TOKEN is mandatory
//! - Validation separates syntactic (parse) from semantic checks

pub mod loader;
pub mod schema;

pub use loader::ConfigError;
pub use schema::{ConnectMode, ListenerConfig, LimitsConfig, ManagerConfig, RelayConfig};
