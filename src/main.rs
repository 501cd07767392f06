//! Cerberus Gateway - governance proxy for MCP tool traffic

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use cerberus_gateway::{
    cli::Cli,
    config::Config,
    gateway::{Gateway, GatewayStores},
    setup_tracing,
    store::seed_demo_tenant,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        upstream_timeout_s = config.upstream.request_timeout_seconds,
        "Starting Cerberus gateway"
    );

    let (stores, store) = GatewayStores::in_memory();

    if cli.seed_demo {
        match seed_demo_tenant(&store, &cli.demo_upstream_url) {
            Ok(demo) => info!(
                organisation_id = %demo.organisation_id,
                workspace_id = %demo.workspace_id,
                agent_id = %demo.agent_id,
                token = %demo.token,
                upstream_url = %cli.demo_upstream_url,
                "Seeded demo tenant (store the token now; only its digest is kept)"
            ),
            Err(e) => {
                error!("Failed to seed demo tenant: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let gateway = match Gateway::new(config, stores) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
