//! Gateway server wiring
//!
//! Composes the stores, engine, upstream client, and HTTP surface into one
//! runnable gateway. The guardrail registry, upstream pool, and counter
//! store are built once here and threaded through state - nothing reaches
//! into process globals.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{any, get},
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::CredentialResolver;
use crate::config::Config;
use crate::engine::{AuditEmitter, DecisionEngine};
use crate::guardrail::{GuardrailDeps, GuardrailRegistry};
use crate::policy::PolicyResolver;
use crate::ratelimit::{MemoryRateLimitStore, RateLimitStore};
use crate::store::{AuditStore, CredentialStore, MemoryStore, PolicyStore};
use crate::upstream::UpstreamClient;
use crate::{Result, gateway::service::ProxyService};

use super::proxy::{proxy_handler, proxy_root_handler};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Credential resolver for bearer tokens
    pub credentials: Arc<CredentialResolver>,
    /// The governed proxy flow
    pub service: Arc<ProxyService>,
}

/// Backing stores the gateway runs against
pub struct GatewayStores {
    /// Agent credential lookups
    pub credentials: Arc<dyn CredentialStore>,
    /// Policy lookups
    pub policies: Arc<dyn PolicyStore>,
    /// Audit sink
    pub audit: Arc<dyn AuditStore>,
    /// Rate limit counters
    pub rate_limits: Arc<dyn RateLimitStore>,
}

impl GatewayStores {
    /// Stores backed by one shared in-memory instance.
    ///
    /// Returns the concrete store too so callers (CLI seeding, tests) can
    /// insert tenants and read audit records.
    #[must_use]
    pub fn in_memory() -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_default_guardrails());
        let stores = Self {
            credentials: store.clone(),
            policies: store.clone(),
            audit: store.clone(),
            rate_limits: Arc::new(MemoryRateLimitStore::new()),
        };
        (stores, store)
    }
}

/// The assembled gateway
pub struct Gateway {
    config: Config,
    state: AppState,
}

impl Gateway {
    /// Wire the gateway components over the given stores.
    ///
    /// # Errors
    ///
    /// Fails when the upstream HTTP pool cannot be constructed.
    pub fn new(config: Config, stores: GatewayStores) -> Result<Self> {
        let registry = Arc::new(GuardrailRegistry::with_builtins());
        let resolver = Arc::new(PolicyResolver::new(stores.policies, config.cache.policy_ttl));
        let deps = GuardrailDeps {
            rate_limits: stores.rate_limits,
        };
        let emitter = AuditEmitter::new(stores.audit);
        let engine = Arc::new(DecisionEngine::new(resolver, registry, deps, emitter));

        let upstream = Arc::new(UpstreamClient::new(
            &config.upstream,
            config.headers.clone(),
        )?);
        let service = Arc::new(ProxyService::new(engine, upstream));
        let credentials = Arc::new(CredentialResolver::new(stores.credentials));

        Ok(Self {
            config,
            state: AppState {
                credentials,
                service,
            },
        })
    }

    /// The HTTP surface: health plus the proxy route for every verb
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/governance-plane/api/v1/proxy", any(proxy_root_handler))
            .route(
                "/governance-plane/api/v1/proxy/{*path}",
                any(proxy_handler),
            )
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(self.config.server.request_timeout))
            .with_state(self.state.clone())
    }

    /// Serve until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Cerberus gateway listening");

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        info!("Gateway stopped");
        Ok(())
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
