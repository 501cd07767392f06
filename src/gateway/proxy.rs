//! Proxy HTTP handler
//!
//! Extracts everything the flow needs from the raw request (bearer header,
//! body, client IP, query, headers), runs the proxy service, and renders
//! the outcome. Every path out of this handler is HTTP 200 with a
//! JSON-RPC-shaped body; errors ride in-band.

use std::net::SocketAddr;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{HeaderName, HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::Error;
use crate::engine::generate_short_id;
use crate::error::rpc_codes;
use crate::protocol::{McpMessage, RequestId};

use super::{AppState, ProxyContext};

/// Upper bound on inbound body size
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// HTTP verbs that normally carry a JSON body
const METHODS_WITH_BODY: &[&str] = &["POST", "PUT", "PATCH"];

/// Handler for `/governance-plane/api/v1/proxy/{*path}`
pub async fn proxy_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request<Body>,
) -> Response {
    handle(state, path, request).await
}

/// Handler for the bare `/governance-plane/api/v1/proxy` route
pub(super) async fn proxy_root_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response {
    handle(state, String::new(), request).await
}

async fn handle(state: AppState, path: String, request: Request<Body>) -> Response {
    let request_id = generate_short_id("req");
    let http_method = request.method().as_str().to_uppercase();
    let request_path = if path.is_empty() {
        "/".to_string()
    } else {
        format!("/{path}")
    };

    let client_headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let authorization = header_value(&client_headers, "authorization");
    let client_agent = header_value(&client_headers, "user-agent");
    let query_params = request.uri().query().map(str::to_string);

    let peer_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());
    let client_ip = client_ip(&client_headers, peer_ip);

    info!(
        request_id = %request_id,
        http_method = %http_method,
        path = %request_path,
        client_ip = ?client_ip,
        "Received proxy request"
    );

    // Step 1: resolve the credential; failures stay in-band
    let agent = match state.credentials.resolve(authorization.as_deref()).await {
        Ok(agent) => agent,
        Err(Error::InvalidCredential) => {
            return envelope_response(
                None,
                rpc_codes::GOVERNANCE_BLOCKED,
                "Invalid or missing agent credential",
                &request_id,
                None,
            );
        }
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Credential lookup failed");
            return envelope_response(
                None,
                rpc_codes::INTERNAL_ERROR,
                format!("Internal error: {e}"),
                &request_id,
                None,
            );
        }
    };

    // Step 2: read and parse the body per verb semantics
    let body_bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Failed to read request body");
            return envelope_response(
                None,
                rpc_codes::INTERNAL_ERROR,
                "Internal error: failed to read request body",
                &request_id,
                None,
            );
        }
    };

    let message: Option<Value> = if METHODS_WITH_BODY.contains(&http_method.as_str()) {
        match serde_json::from_slice::<Value>(&body_bytes) {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Invalid request body");
                return envelope_response(
                    None,
                    rpc_codes::PARSE_ERROR,
                    format!("Invalid JSON: {e}"),
                    &request_id,
                    None,
                );
            }
        }
    } else if http_method == "DELETE" && !body_bytes.is_empty() {
        // body is optional on DELETE; a bad one is ignored
        serde_json::from_slice::<Value>(&body_bytes).ok()
    } else {
        None
    };

    let mcp_id = message
        .as_ref()
        .and_then(|m| m.get("id"))
        .and_then(value_to_request_id);

    // Step 3: a workspace without an upstream cannot serve traffic
    if agent.upstream_url.is_empty() {
        warn!(
            request_id = %request_id,
            workspace_id = %agent.workspace_id,
            "No upstream URL configured"
        );
        return envelope_response(
            mcp_id,
            rpc_codes::INTERNAL_ERROR,
            "No MCP server URL configured for this workspace",
            &request_id,
            None,
        );
    }

    let context = ProxyContext {
        request_id: request_id.clone(),
        agent,
        request_path,
        http_method,
        client_ip,
        client_agent,
        received_at: Utc::now(),
        message,
        client_headers,
        query_params,
    };

    // Step 4: the governed exchange
    let outcome = state.service.proxy_request(&context).await;

    let mut response = (StatusCode::OK, Json(outcome.body)).into_response();
    let headers = response.headers_mut();
    for (name, value) in &outcome.upstream_headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            // the JSON serializer owns the content type
            if name != header::CONTENT_TYPE {
                headers.insert(name, value);
            }
        }
    }
    set_header(headers, "X-Request-ID", &request_id);
    set_header(
        headers,
        "X-Request-Decision-ID",
        &outcome.info.request_decision_id,
    );
    if let Some(response_decision_id) = &outcome.info.response_decision_id {
        set_header(headers, "X-Response-Decision-ID", response_decision_id);
    }

    response
}

fn header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

/// First `X-Forwarded-For` entry, else the socket peer
fn client_ip(headers: &[(String, String)], peer_ip: Option<String>) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .and_then(|raw| raw.split(',').next().map(|ip| ip.trim().to_string()))
        .or(peer_ip)
}

fn value_to_request_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        _ => None,
    }
}

fn envelope_response(
    id: Option<RequestId>,
    code: i32,
    message: impl Into<String>,
    request_id: &str,
    data: Option<Value>,
) -> Response {
    let body = McpMessage::error_envelope(id, code, message, data);
    let mut response = (StatusCode::OK, Json(body)).into_response();
    set_header(response.headers_mut(), "X-Request-ID", request_id);
    response
}

fn set_header(headers: &mut axum::http::HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        headers.insert(name, value);
    }
}
