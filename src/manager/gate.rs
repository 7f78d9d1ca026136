//! Upgrade gate for the manager control channel.
//!
//! The channel upgrades on a dedicated path. The shared secret is accepted
//! as an `x-manager-token` header or a `token` query parameter; anything
//! else is a 401 and the transport never upgrades.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::manager::channel;
use crate::observability::metrics;
use crate::relay::Relay;

/// Header carrying the shared manager secret.
pub const MANAGER_TOKEN_HEADER: &str = "x-manager-token";

/// Axum handler for the manager path.
pub async fn manager_upgrade(
    State(relay): State<Arc<Relay>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let presented = headers
        .get(MANAGER_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .or_else(|| params.get("token").map(String::as_str));

    if presented != Some(relay.config.manager.token.as_str()) {
        warn!("manager upgrade rejected: bad or missing token");
        metrics::record_auth_failure();
        return (StatusCode::UNAUTHORIZED, "invalid manager token").into_response();
    }

    ws.on_upgrade(move |socket| channel::run_channel(relay, socket))
}
