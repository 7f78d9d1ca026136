//! Shared relay state.
//!
//! The "single manager" slot, connection registry, and pending-decision
//! table are process-wide, but they live as fields of an explicit [`Relay`]
//! value constructed at startup and passed to every handler. No ambient
//! globals.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::manager::frames::{ControlFrame, Decision};
use crate::manager::{ConnectionRegistry, ManagerSlot, PendingDecisions};

/// Process-wide relay state shared by client handlers and the manager
/// channel dispatcher.
pub struct Relay {
    pub config: RelayConfig,
    pub manager: ManagerSlot,
    pub registry: ConnectionRegistry,
    pub pending: PendingDecisions,
    /// Outbound client for plaintext target requests. Follows no redirects,
    /// so the manager sees every hop.
    pub(crate) client: Client<HttpConnector, Full<Bytes>>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Arc<Self> {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Arc::new(Self {
            config,
            manager: ManagerSlot::new(),
            registry: ConnectionRegistry::new(),
            pending: PendingDecisions::new(),
            client,
        })
    }

    /// Review-RPC round trip: register a waiter under the frame's request id,
    /// write the frame, and await the manager's decision under the configured
    /// deadline.
    ///
    /// Fails fast with [`RelayError::ManagerNotConnected`] when no channel is
    /// installed. Deadline expiry abandons the waiter but not the work the
    /// manager may still do; a reply arriving later finds no waiter and is
    /// dropped.
    pub async fn send_review(&self, frame: &ControlFrame) -> Result<Decision, RelayError> {
        let handle = self
            .manager
            .current()
            .ok_or(RelayError::ManagerNotConnected)?;

        let id = match frame {
            ControlFrame::ReviewRequest(request) => request.id.clone(),
            ControlFrame::ResponseReview(review) => review.id.clone(),
            _ => {
                return Err(RelayError::Internal(
                    "only review frames carry a decision RPC".into(),
                ))
            }
        };

        let waiter = self.pending.register(id.clone());
        if let Err(err) = handle.send_frame(frame).await {
            self.pending.discard(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.decision_deadline(), waiter).await {
            Ok(Ok(decision)) => Ok(decision),
            // The waiter's sender was dropped: fail_all ran underneath us.
            Ok(Err(_)) => Err(RelayError::ManagerDisconnected),
            Err(_) => {
                self.pending.discard(&id);
                Err(RelayError::ManagerTimeout)
            }
        }
    }

    fn decision_deadline(&self) -> Duration {
        Duration::from_millis(self.config.manager.decision_timeout_ms)
    }
}
