//! Absolute-URI proxy path: buffer, review, forward, review, reply.
//!
//! The review protocol is whole-message, so both the request body and the
//! target response are buffered in full (bounded by `max_body_bytes`). The
//! continuation is straight-line: request review → target → response review
//! → client write. A failed *response* review falls back to the original
//! target response so clients are not penalized by manager flakiness.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::manager::frames::{
    ControlFrame, Decision, HeaderFields, Modified, ResponseReview, ReviewRequest, ReviewSubject,
};
use crate::observability::metrics;
use crate::relay::Relay;

pub async fn handle(relay: Arc<Relay>, req: Request<Incoming>) -> Response<Body> {
    let method = req.method().clone();
    match review_and_forward(&relay, req).await {
        Ok(response) => {
            metrics::record_request(method.as_str(), response.status().as_u16());
            response
        }
        Err(err) => {
            warn!(method = %method, error = %err, "proxy request failed");
            metrics::record_request(method.as_str(), err.status().as_u16());
            error_response(&err)
        }
    }
}

async fn review_and_forward(
    relay: &Relay,
    req: Request<Incoming>,
) -> Result<Response<Body>, RelayError> {
    let (parts, body) = req.into_parts();
    let url = parts.uri.to_string();
    let headers = header_fields(&parts.headers);
    let body = read_limited(body, relay.config.limits.max_body_bytes).await?;

    let review = ControlFrame::ReviewRequest(ReviewRequest {
        id: Uuid::new_v4().to_string(),
        subject: ReviewSubject::Http {
            method: parts.method.to_string(),
            url: url.clone(),
            headers: headers.clone(),
            body: body.to_vec(),
        },
    });
    let decision = relay.send_review(&review).await?;
    metrics::record_review("http", &decision);
    if decision.is_reject() {
        return Ok(rejection_response(&decision));
    }

    let outbound =
        build_target_request(&parts.method, &url, &headers, body, decision.modified.as_ref())?;
    let target_response = relay
        .client
        .request(outbound)
        .await
        .map_err(|err| RelayError::Target(err.to_string()))?;

    let (target_parts, target_body) = target_response.into_parts();
    let target_bytes = target_body
        .collect()
        .await
        .map_err(|err| RelayError::Target(err.to_string()))?
        .to_bytes();
    let target_headers = header_fields(&target_parts.headers);
    let target_status = target_parts.status.as_u16();

    let review = ControlFrame::ResponseReview(ResponseReview {
        id: Uuid::new_v4().to_string(),
        status: target_status,
        headers: target_headers.clone(),
        body: target_bytes.to_vec(),
    });
    let decision = match relay.send_review(&review).await {
        Ok(decision) => decision,
        Err(
            RelayError::ManagerTimeout
            | RelayError::ManagerDisconnected
            | RelayError::ManagerNotConnected,
        ) => {
            // Degraded but correct: the target already answered.
            debug!(url = %url, "response review unavailable; forwarding original response");
            return client_response(target_status, &target_headers, target_bytes);
        }
        Err(err) => return Err(err),
    };
    metrics::record_review("response", &decision);
    if decision.is_reject() {
        return Ok(rejection_response(&decision));
    }

    let modified = decision.modified.unwrap_or_default();
    let status = modified.status.unwrap_or(target_status);
    let mut headers = target_headers;
    if let Some(extra) = modified.headers {
        headers.extend(extra);
    }
    let body = modified.body.map(Bytes::from).unwrap_or(target_bytes);
    client_response(status, &headers, body)
}

/// Buffer a client body under the configured cap.
async fn read_limited(body: Incoming, limit: usize) -> Result<Bytes, RelayError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<http_body_util::LengthLimitError>().is_some() => {
            Err(RelayError::BodyTooLarge)
        }
        Err(err) => Err(RelayError::Internal(format!(
            "failed to read request body: {err}"
        ))),
    }
}

/// Merge the manager's modifications over the original request and build the
/// outbound target request. Unspecified fields keep their originals; headers
/// shallow-merge with manager keys winning; a modified body replaces.
fn build_target_request(
    method: &Method,
    url: &str,
    headers: &HeaderFields,
    body: Bytes,
    modified: Option<&Modified>,
) -> Result<Request<Full<Bytes>>, RelayError> {
    let url = modified
        .and_then(|m| m.url.as_deref())
        .unwrap_or(url);
    let method = match modified.and_then(|m| m.method.as_deref()) {
        Some(name) => Method::from_bytes(name.as_bytes()).map_err(|_| {
            RelayError::Internal(format!("manager supplied invalid method '{name}'"))
        })?,
        None => method.clone(),
    };
    let uri: Uri = url
        .parse()
        .map_err(|_| RelayError::Target(format!("invalid target url '{url}'")))?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(RelayError::Target(format!(
            "target url '{url}' is not absolute"
        )));
    }

    let mut merged = headers.clone();
    if let Some(extra) = modified.and_then(|m| m.headers.as_ref()) {
        merged.extend(extra.clone());
    }
    let body = modified
        .and_then(|m| m.body.clone())
        .map(Bytes::from)
        .unwrap_or(body);

    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in &merged {
        if is_connection_header(name) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Full::new(body))
        .map_err(|err| RelayError::Internal(format!("failed to build target request: {err}")))
}

/// Build the client-facing response from (possibly modified) buffered parts.
fn client_response(
    status: u16,
    headers: &HeaderFields,
    body: Bytes,
) -> Result<Response<Body>, RelayError> {
    let status = StatusCode::from_u16(status)
        .map_err(|_| RelayError::Internal(format!("invalid response status {status}")))?;
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        if is_connection_header(name) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(body))
        .map_err(|err| RelayError::Internal(format!("failed to build client response: {err}")))
}

/// Headers that describe the hop or the old framing, not the message. Both
/// directions are re-framed from buffered bytes, so these are re-derived.
fn is_connection_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "proxy-connection"
            | "keep-alive"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
    )
}

/// Collapse a header map into wire fields, folding duplicate names.
pub(crate) fn header_fields(headers: &HeaderMap) -> HeaderFields {
    let mut fields = HeaderFields::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            // Non-UTF-8 header values cannot ride a JSON frame.
            continue;
        };
        fields
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    fields
}

/// 403 with the manager's reason as the body.
pub(crate) fn rejection_response(decision: &Decision) -> Response<Body> {
    (StatusCode::FORBIDDEN, decision.reason().to_string()).into_response()
}

pub(crate) fn error_response(err: &RelayError) -> Response<Body> {
    (err.status(), err.to_string()).into_response()
}
