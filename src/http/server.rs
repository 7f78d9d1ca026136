//! Per-connection HTTP serving and dispatch.
//!
//! # Responsibilities
//! - Serve each accepted client socket with hyper HTTP/1.1 + upgrades
//!   (CONNECT tunnels and the manager WebSocket both need them)
//! - Dispatch by request shape: CONNECT → tunnel handler, absolute-URI →
//!   forward handler, origin-form → the Axum router carrying the manager
//!   upgrade path
//! - Keep the proxy transparent: preserve header case on the wire

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::routing::any;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower::util::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::http::{connect, forward};
use crate::manager::gate;
use crate::net::{ConnectionPermit, Listener, ListenerError};
use crate::relay::Relay;

/// HTTP server for the relay: accept loop plus per-connection dispatch.
pub struct ProxyServer {
    relay: Arc<Relay>,
    router: Router,
}

impl ProxyServer {
    /// Build the server around shared relay state. The router serves only
    /// the manager upgrade path; everything else bypasses it.
    pub fn new(relay: Arc<Relay>) -> Self {
        let router = Router::new()
            .route(relay.config.manager.path.as_str(), any(gate::manager_upgrade))
            .layer(TraceLayer::new_for_http())
            .with_state(relay.clone());
        Self { relay, router }
    }

    /// Run the accept loop until the shutdown signal fires.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("proxy accept loop stopping");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer, permit) = accepted?;
                    let relay = self.relay.clone();
                    let router = self.router.clone();
                    tokio::spawn(serve_client(relay, router, stream, peer, permit));
                }
            }
        }
        Ok(())
    }
}

async fn serve_client(
    relay: Arc<Relay>,
    router: Router,
    stream: TcpStream,
    peer: SocketAddr,
    permit: ConnectionPermit,
) {
    let service = service_fn(move |req: Request<Incoming>| {
        dispatch(relay.clone(), router.clone(), req)
    });

    if let Err(err) = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        debug!(peer = %peer, error = %err, "client connection ended with error");
    }
    drop(permit);
}

/// Route one request by its shape, per the forward-proxy convention.
async fn dispatch(
    relay: Arc<Relay>,
    router: Router,
    req: Request<Incoming>,
) -> Result<Response<Body>, Infallible> {
    if req.method() == Method::CONNECT {
        Ok(connect::handle(relay, req).await)
    } else if req.uri().scheme().is_some() {
        Ok(forward::handle(relay, req).await)
    } else {
        // Origin-form: only the manager upgrade path lives here; anything
        // else falls through to the router's 404.
        router.oneshot(req).await
    }
}
