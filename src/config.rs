//! Configuration management
//!
//! Layered like the rest of the stack expects: struct defaults, then an
//! optional YAML file, then `CERBERUS_*` environment variables with `__`
//! nesting. The flat, documented proxy variables
//! (`MCP_REQUEST_TIMEOUT_SECONDS`, `PROXY_FORWARD_AUTHORIZATION`, ...) are
//! applied last as explicit overrides so operators can tune the proxy
//! without learning the nested scheme.

use std::{collections::HashSet, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load after config parsing. Loaded in order,
    /// later files override earlier. Missing files are skipped.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream client configuration
    pub upstream: UpstreamConfig,
    /// Header forwarding policy
    pub headers: HeaderForwardConfig,
    /// Cache configuration
    pub cache: CacheConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Inbound request deadline. Covers the upstream call plus a small
    /// governance budget, so it should stay above the upstream timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(95),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Upstream HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Per-attempt request timeout in seconds
    pub request_timeout_seconds: f64,
    /// Retry attempts on connect errors and timeouts
    pub max_retries: u32,
    /// Keepalive connections retained per host
    pub max_keepalive_connections: usize,
    /// Total connection cap across the pool
    pub max_connections: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30.0,
            max_retries: 2,
            max_keepalive_connections: 20,
            max_connections: 100,
        }
    }
}

impl UpstreamConfig {
    /// Per-attempt timeout as a [`Duration`]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_seconds.max(0.0))
    }
}

/// Which client headers reach the upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderForwardConfig {
    /// Forward the client's `Authorization` header to the upstream
    pub forward_authorization: bool,
    /// Header name carrying the gateway request id
    pub request_id_header: String,
    /// Header name carrying the client IP
    pub forwarded_for_header: String,
    /// Forward every client header not on a blocklist
    pub forward_all_headers: bool,
    /// Comma-separated extra headers to block
    pub blocked_headers: String,
    /// Comma-separated allowlist used when `forward_all_headers` is off
    pub forward_headers: String,
}

impl Default for HeaderForwardConfig {
    fn default() -> Self {
        Self {
            forward_authorization: false,
            request_id_header: "X-Gateway-Request-ID".to_string(),
            forwarded_for_header: "X-Forwarded-For".to_string(),
            forward_all_headers: false,
            blocked_headers: String::new(),
            forward_headers: "accept,accept-language,content-type".to_string(),
        }
    }
}

impl HeaderForwardConfig {
    /// Configured blocklist, lowercased
    #[must_use]
    pub fn blocked_headers_set(&self) -> HashSet<String> {
        parse_header_list(&self.blocked_headers)
    }

    /// Configured allowlist, lowercased
    #[must_use]
    pub fn forward_headers_set(&self) -> HashSet<String> {
        parse_header_list(&self.forward_headers)
    }
}

fn parse_header_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for memoised effective policy sets
    #[serde(with = "humantime_serde")]
    pub policy_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy_ttl: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Load configuration from defaults, optional YAML file, environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("CERBERUS_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Load configured environment files into the process environment
    fn load_env_files(&self) {
        for file in &self.env_files {
            if dotenvy::from_path(file).is_err() {
                tracing::debug!(file = %file, "Env file not loaded, skipping");
            }
        }
    }

    /// Apply the documented flat environment variables
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parsed::<f64>("MCP_REQUEST_TIMEOUT_SECONDS")? {
            self.upstream.request_timeout_seconds = v;
        }
        if let Some(v) = env_parsed::<u32>("MCP_MAX_RETRIES")? {
            self.upstream.max_retries = v;
        }
        if let Some(v) = env_parsed::<usize>("MCP_MAX_KEEPALIVE_CONNECTIONS")? {
            self.upstream.max_keepalive_connections = v;
        }
        if let Some(v) = env_parsed::<usize>("MCP_MAX_CONNECTIONS")? {
            self.upstream.max_connections = v;
        }
        if let Some(v) = env_bool("PROXY_FORWARD_AUTHORIZATION")? {
            self.headers.forward_authorization = v;
        }
        if let Ok(v) = env::var("PROXY_REQUEST_ID_HEADER") {
            self.headers.request_id_header = v;
        }
        if let Ok(v) = env::var("PROXY_FORWARDED_FOR_HEADER") {
            self.headers.forwarded_for_header = v;
        }
        if let Some(v) = env_bool("PROXY_FORWARD_ALL_HEADERS")? {
            self.headers.forward_all_headers = v;
        }
        if let Ok(v) = env::var("PROXY_BLOCKED_HEADERS") {
            self.headers.blocked_headers = v;
        }
        if let Ok(v) = env::var("PROXY_FORWARD_HEADERS") {
            self.headers.forward_headers = v;
        }
        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid value for {name}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    match env::var(name) {
        Ok(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            _ => Err(Error::Config(format!("invalid boolean for {name}: '{raw}'"))),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert!((config.upstream.request_timeout_seconds - 30.0).abs() < f64::EPSILON);
        assert_eq!(config.upstream.max_retries, 2);
        assert_eq!(config.upstream.max_keepalive_connections, 20);
        assert_eq!(config.upstream.max_connections, 100);
        assert!(!config.headers.forward_authorization);
        assert_eq!(config.headers.request_id_header, "X-Gateway-Request-ID");
        assert_eq!(config.headers.forwarded_for_header, "X-Forwarded-For");
        assert!(!config.headers.forward_all_headers);
        assert_eq!(config.cache.policy_ttl, Duration::from_secs(300));
    }

    #[test]
    fn default_forward_allowlist() {
        let headers = HeaderForwardConfig::default();
        let allow = headers.forward_headers_set();
        assert!(allow.contains("accept"));
        assert!(allow.contains("accept-language"));
        assert!(allow.contains("content-type"));
        assert_eq!(allow.len(), 3);
    }

    #[test]
    fn header_lists_are_trimmed_and_lowercased() {
        let headers = HeaderForwardConfig {
            blocked_headers: " X-Secret , x-internal,, ".to_string(),
            ..Default::default()
        };
        let blocked = headers.blocked_headers_set();
        assert!(blocked.contains("x-secret"));
        assert!(blocked.contains("x-internal"));
        assert_eq!(blocked.len(), 2);
    }

    #[test]
    fn timeout_conversion() {
        let upstream = UpstreamConfig {
            request_timeout_seconds: 1.5,
            ..Default::default()
        };
        assert_eq!(upstream.timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/cerberus.yaml")));
        assert!(result.is_err());
    }
}
