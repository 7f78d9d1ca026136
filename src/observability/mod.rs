//! Observability subsystem: structured logging lives with `tracing` at the
//! call sites; this module owns the Prometheus exporter and the record
//! helpers the rest of the relay calls.

pub mod metrics;
