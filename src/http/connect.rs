//! CONNECT tunnel path.
//!
//! Every tunnel starts with a `connect` review RPC against the manager. On
//! approval the bytes move in one of two modes, chosen per deployment:
//! direct-splice (dial the target, copy bidirectionally) or relayed (every
//! chunk crosses the manager channel as a data frame, multiplexed by
//! connection id).

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ConnectMode;
use crate::error::RelayError;
use crate::http::forward::{error_response, header_fields, rejection_response};
use crate::manager::frames::{ControlFrame, DataFrame, ReviewRequest, ReviewSubject};
use crate::manager::registry::TunnelCommand;
use crate::observability::metrics;
use crate::relay::Relay;

/// Queued writes from the manager dispatcher toward one tunneled client.
const TUNNEL_QUEUE: usize = 32;

pub async fn handle(relay: Arc<Relay>, req: Request<Incoming>) -> Response<Body> {
    let Some(authority) = req.uri().authority().cloned() else {
        return (
            StatusCode::BAD_REQUEST,
            "CONNECT target must be host:port",
        )
            .into_response();
    };
    let host = authority.host().to_string();
    let port = authority.port_u16().unwrap_or(443);

    let review = ControlFrame::ReviewRequest(ReviewRequest {
        id: Uuid::new_v4().to_string(),
        subject: ReviewSubject::Connect {
            host: host.clone(),
            port,
            headers: header_fields(req.headers()),
        },
    });
    let decision = match relay.send_review(&review).await {
        Ok(decision) => decision,
        Err(err) => {
            warn!(host = %host, port, error = %err, "CONNECT review failed");
            metrics::record_request("CONNECT", err.status().as_u16());
            return error_response(&err);
        }
    };
    metrics::record_review("connect", &decision);
    if decision.is_reject() {
        metrics::record_request("CONNECT", StatusCode::FORBIDDEN.as_u16());
        return rejection_response(&decision);
    }

    match relay.config.connect_mode {
        ConnectMode::Direct => direct_splice(req, host, port).await,
        ConnectMode::Relayed => relayed(relay, req, host, port).await,
    }
}

/// Dial the target, then splice the upgraded client connection against it
/// until either side closes. Dial failures surface as 502 before any success
/// response; failures after the 200 close both sides.
async fn direct_splice(req: Request<Incoming>, host: String, port: u16) -> Response<Body> {
    let target = match TcpStream::connect((host.as_str(), port)).await {
        Ok(target) => target,
        Err(err) => {
            warn!(host = %host, port, error = %err, "CONNECT target dial failed");
            metrics::record_request("CONNECT", StatusCode::BAD_GATEWAY.as_u16());
            return error_response(&RelayError::Target(err.to_string()));
        }
    };

    let upgrade = hyper::upgrade::on(req);
    tokio::spawn(async move {
        let upgraded = match upgrade.await {
            Ok(upgraded) => upgraded,
            Err(err) => {
                debug!(error = %err, "CONNECT upgrade failed before splice");
                return;
            }
        };
        // Head bytes sent with the CONNECT ride in the upgrade's read buffer.
        let mut client = TokioIo::new(upgraded);
        let mut target = target;
        match tokio::io::copy_bidirectional(&mut client, &mut target).await {
            Ok((from_client, from_target)) => {
                metrics::record_tunnel_bytes("to_target", from_client as usize);
                metrics::record_tunnel_bytes("to_client", from_target as usize);
                debug!(host = %host, port, from_client, from_target, "tunnel closed");
            }
            Err(err) => debug!(host = %host, port, error = %err, "tunnel error"),
        }
    });

    metrics::record_request("CONNECT", StatusCode::OK.as_u16());
    StatusCode::OK.into_response()
}

/// Register the client in the connection registry and pump bytes between it
/// and the manager channel as data frames.
async fn relayed(
    relay: Arc<Relay>,
    req: Request<Incoming>,
    host: String,
    port: u16,
) -> Response<Body> {
    let (commands_tx, commands_rx) = mpsc::channel(TUNNEL_QUEUE);
    let id = relay.registry.register(commands_tx);
    debug!(id = %id, host = %host, port, "relayed tunnel registered");

    let upgrade = hyper::upgrade::on(req);
    tokio::spawn(run_tunnel(relay, upgrade, id, host, port, commands_rx));

    metrics::record_request("CONNECT", StatusCode::OK.as_u16());
    StatusCode::OK.into_response()
}

/// One relayed tunnel: owns the client socket after the upgrade.
///
/// Exits when the client closes (emits `end`, unregisters), when the manager
/// ends or loses the connection (socket is closed, not stranded), or on any
/// socket error. Per-id ordering holds in both directions: inbound writes
/// drain a single command queue, outbound chunks are read sequentially.
async fn run_tunnel(
    relay: Arc<Relay>,
    upgrade: OnUpgrade,
    id: String,
    host: String,
    port: u16,
    mut commands: mpsc::Receiver<TunnelCommand>,
) {
    let upgraded = match upgrade.await {
        Ok(upgraded) => upgraded,
        Err(err) => {
            debug!(id = %id, error = %err, "CONNECT upgrade failed before relay");
            relay.registry.unregister(&id);
            return;
        }
    };
    let (mut reader, mut writer) = tokio::io::split(TokioIo::new(upgraded));
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(TunnelCommand::Write(bytes)) => {
                    metrics::record_tunnel_bytes("to_client", bytes.len());
                    if writer.write_all(&bytes).await.is_err() {
                        relay.registry.unregister(&id);
                        send_end(&relay, &id).await;
                        break;
                    }
                }
                // The manager ended this connection or the channel is gone;
                // its partner state no longer exists.
                Some(TunnelCommand::Shutdown) | None => {
                    let _ = writer.shutdown().await;
                    relay.registry.unregister(&id);
                    break;
                }
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    relay.registry.unregister(&id);
                    send_end(&relay, &id).await;
                    break;
                }
                Ok(n) => {
                    metrics::record_tunnel_bytes("to_manager", n);
                    let frame = ControlFrame::Data(DataFrame {
                        id: id.clone(),
                        host: Some(host.clone()),
                        port: Some(port),
                        data: buf[..n].to_vec(),
                    });
                    if !send_data(&relay, &frame).await {
                        relay.registry.unregister(&id);
                        break;
                    }
                }
                Err(err) => {
                    debug!(id = %id, error = %err, "tunnel client read failed");
                    relay.registry.unregister(&id);
                    send_end(&relay, &id).await;
                    break;
                }
            }
        }
    }
    debug!(id = %id, "relayed tunnel finished");
}

async fn send_data(relay: &Relay, frame: &ControlFrame) -> bool {
    match relay.manager.current() {
        Some(handle) => handle.send_frame(frame).await.is_ok(),
        None => false,
    }
}

async fn send_end(relay: &Relay, id: &str) {
    if let Some(handle) = relay.manager.current() {
        let frame = ControlFrame::End { id: id.to_string() };
        let _ = handle.send_frame(&frame).await;
    }
}
