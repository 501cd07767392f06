//! Upstream MCP client
//!
//! Pooled HTTP client that forwards governed messages to the workspace's
//! upstream MCP server. Connect errors and timeouts are retried up to the
//! configured bound; application-level error statuses are never retried.
//! Outbound headers pass the forwarding policy first, then the fixed
//! gateway headers overwrite anything the client sent.

use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::config::{HeaderForwardConfig, UpstreamConfig};
use crate::gateway::ProxyContext;

/// Hop-by-hop headers that never reach the upstream
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-connection",
];

/// Headers the gateway stamps itself; client copies are dropped
const GATEWAY_HEADERS: &[&str] = &[
    "x-gateway-request-id",
    "x-forwarded-for",
    "x-organisation-id",
    "x-mcp-server-workspace-id",
    "x-agent-access-id",
    "x-original-user-agent",
];

/// Response headers the transport recomputes, never forwarded back
const RESPONSE_EXCLUDED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "content-encoding",
    "content-length",
];

/// Outcome of one upstream forward
#[derive(Debug, Clone)]
pub enum UpstreamResult {
    /// The upstream answered with parseable JSON
    Success(UpstreamResponse),
    /// The upstream was unreachable, timed out, or sent a bad body
    Failure(UpstreamFailure),
}

/// Successful upstream exchange
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// Upstream HTTP status
    pub status: u16,
    /// Parsed JSON body
    pub body: Value,
    /// Round-trip time
    pub response_time_ms: u64,
    /// Upstream headers cleared for forwarding to the client
    pub headers: Vec<(String, String)>,
}

/// Failed upstream exchange
#[derive(Debug, Clone)]
pub struct UpstreamFailure {
    /// Gateway-assigned status for the failure class
    pub status: u16,
    /// What went wrong
    pub error_message: String,
    /// Time spent before giving up
    pub response_time_ms: u64,
}

/// Pooled client for upstream MCP servers
pub struct UpstreamClient {
    client: Client,
    max_retries: u32,
    headers_config: HeaderForwardConfig,
}

impl UpstreamClient {
    /// Build the client with its connection pool.
    ///
    /// # Errors
    ///
    /// [`Error::Http`] when the TLS/pool setup fails.
    pub fn new(upstream: &UpstreamConfig, headers_config: HeaderForwardConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(upstream.timeout())
            .pool_max_idle_per_host(upstream.max_keepalive_connections)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        info!(
            timeout_seconds = upstream.request_timeout_seconds,
            max_retries = upstream.max_retries,
            max_keepalive = upstream.max_keepalive_connections,
            "Upstream client initialized"
        );

        Ok(Self {
            client,
            max_retries: upstream.max_retries,
            headers_config,
        })
    }

    /// Forward a message to the context's upstream server.
    ///
    /// `message` overrides the context body (the governance layer may have
    /// modified it); `None` falls back to the original body, which is itself
    /// absent for body-less verbs.
    pub async fn forward(&self, context: &ProxyContext, message: Option<&Value>) -> UpstreamResult {
        if context.agent.upstream_url.is_empty() {
            error!(
                request_id = %context.request_id,
                workspace_id = %context.agent.workspace_id,
                "No upstream URL configured for workspace"
            );
            return UpstreamResult::Failure(UpstreamFailure {
                status: 500,
                error_message: "No MCP server URL configured for this workspace".to_string(),
                response_time_ms: 0,
            });
        }

        let url = build_upstream_url(
            &context.agent.upstream_url,
            &context.request_path,
            context.query_params.as_deref(),
        );
        let body = message.or(context.message.as_ref());
        let headers = self.prepare_headers(context);

        debug!(
            request_id = %context.request_id,
            http_method = %context.http_method,
            upstream_url = %url,
            has_body = body.is_some(),
            "Forwarding to upstream"
        );

        let started = Instant::now();
        let response = match self
            .send_with_retries(&context.http_method, &url, body, &headers, &context.request_id)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let elapsed = elapsed_ms(started);
                let (status, error_message) = classify_send_error(&e);
                error!(
                    request_id = %context.request_id,
                    upstream_url = %url,
                    elapsed_ms = elapsed,
                    error = %e,
                    "Upstream request failed"
                );
                return UpstreamResult::Failure(UpstreamFailure {
                    status,
                    error_message,
                    response_time_ms: elapsed,
                });
            }
        };

        let elapsed = elapsed_ms(started);
        let status = response.status();
        let forwarded_headers = extract_response_headers(response.headers());

        info!(
            request_id = %context.request_id,
            status = status.as_u16(),
            response_time_ms = elapsed,
            "Upstream response received"
        );

        match response.json::<Value>().await {
            Ok(body) => UpstreamResult::Success(UpstreamResponse {
                status: status.as_u16(),
                body,
                response_time_ms: elapsed,
                headers: forwarded_headers,
            }),
            Err(e) => {
                error!(
                    request_id = %context.request_id,
                    status = status.as_u16(),
                    error = %e,
                    "Upstream returned invalid JSON"
                );
                UpstreamResult::Failure(UpstreamFailure {
                    status: StatusCode::BAD_GATEWAY.as_u16(),
                    error_message: "Upstream returned invalid JSON".to_string(),
                    response_time_ms: elapsed_ms(started),
                })
            }
        }
    }

    async fn send_with_retries(
        &self,
        method: &str,
        url: &str,
        body: Option<&Value>,
        headers: &HeaderMap,
        request_id: &str,
    ) -> reqwest::Result<reqwest::Response> {
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
            .unwrap_or(Method::POST);

        let mut attempt = 0u32;
        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(headers.clone());

            // GET/HEAD/OPTIONS never carry a body; everything else forwards
            // one when present (DELETE optionally, POST/PUT/PATCH normally).
            let body_allowed =
                method != Method::GET && method != Method::HEAD && method != Method::OPTIONS;
            if body_allowed {
                if let Some(body) = body {
                    request = request.json(body);
                }
            }

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let transient = e.is_connect() || e.is_timeout();
                    if transient && attempt < self.max_retries {
                        attempt += 1;
                        warn!(
                            request_id = %request_id,
                            attempt = attempt,
                            max_retries = self.max_retries,
                            error = %e,
                            "Upstream request failed, retrying"
                        );
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Compute outbound headers: filtered client headers first, then the
    /// fixed gateway set overwriting them.
    fn prepare_headers(&self, context: &ProxyContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let blocked = self.headers_config.blocked_headers_set();
        let allowlist = self.headers_config.forward_headers_set();

        for (name, value) in &context.client_headers {
            let lower = name.to_lowercase();

            if HOP_BY_HOP_HEADERS.contains(&lower.as_str()) || blocked.contains(&lower) {
                continue;
            }
            if GATEWAY_HEADERS.contains(&lower.as_str()) {
                continue;
            }
            if lower == "authorization" {
                if self.headers_config.forward_authorization {
                    insert_header(&mut headers, name, value);
                }
                continue;
            }
            if self.headers_config.forward_all_headers || allowlist.contains(&lower) {
                insert_header(&mut headers, name, value);
            }
        }

        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        insert_header(
            &mut headers,
            &self.headers_config.request_id_header,
            &context.request_id,
        );
        insert_header(
            &mut headers,
            &self.headers_config.forwarded_for_header,
            context.client_ip.as_deref().unwrap_or("unknown"),
        );
        insert_header(
            &mut headers,
            "X-Organisation-ID",
            &context.agent.organisation_id.to_string(),
        );
        insert_header(
            &mut headers,
            "X-MCP-Server-Workspace-ID",
            &context.agent.workspace_id.to_string(),
        );
        insert_header(
            &mut headers,
            "X-Agent-Access-ID",
            &context.agent.agent_id.to_string(),
        );
        if let Some(agent) = &context.client_agent {
            insert_header(&mut headers, "X-Original-User-Agent", agent);
        }

        headers
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::try_from(name),
        HeaderValue::try_from(value),
    ) {
        headers.insert(name, value);
    }
}

/// `strip_trailing_slash(base) + ensure_leading_slash(path) + ?query`
fn build_upstream_url(base: &str, path: &str, query: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    let mut url = if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    };
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

fn classify_send_error(error: &reqwest::Error) -> (u16, String) {
    if error.is_timeout() {
        (504, format!("Upstream server timeout: {error}"))
    } else if error.is_connect() {
        (502, format!("Cannot connect to upstream server: {error}"))
    } else {
        (502, format!("Unexpected error: {error}"))
    }
}

fn extract_response_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !RESPONSE_EXCLUDED_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
