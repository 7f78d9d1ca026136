//! Relay error kinds and their HTTP status mapping.
//!
//! Errors are handled at the closest handler boundary and translated into an
//! HTTP status for the client. Per-connection failures never take down the
//! manager channel; only transport loss on the channel itself cascades.

use axum::http::StatusCode;

/// Errors surfaced by the relay while serving a client request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    /// No manager channel is currently connected.
    #[error("no manager channel is connected")]
    ManagerNotConnected,

    /// The review deadline elapsed before the manager replied.
    #[error("manager decision timed out")]
    ManagerTimeout,

    /// The manager channel was lost while a review was in flight.
    #[error("manager channel disconnected")]
    ManagerDisconnected,

    /// The client request body exceeded the configured limit.
    #[error("request body exceeds the configured limit")]
    BodyTooLarge,

    /// Dial/read/write failure against the target server.
    #[error("target request failed: {0}")]
    Target(String),

    /// Unexpected internal failure; the connection is closed.
    #[error("internal relay error: {0}")]
    Internal(String),
}

impl RelayError {
    /// The HTTP status reported to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::ManagerNotConnected => StatusCode::BAD_GATEWAY,
            RelayError::ManagerTimeout => StatusCode::GATEWAY_TIMEOUT,
            RelayError::ManagerDisconnected => StatusCode::GATEWAY_TIMEOUT,
            RelayError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Target(_) => StatusCode::BAD_GATEWAY,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
