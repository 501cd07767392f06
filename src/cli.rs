//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Cerberus Gateway - governance proxy for MCP tool traffic
#[derive(Parser, Debug)]
#[command(name = "cerberus-gateway", version, about)]
pub struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, env = "CERBERUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host to bind (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CERBERUS_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text or json)
    #[arg(long, env = "CERBERUS_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Seed a demo organisation, workspace, and agent credential at startup
    /// (the bearer token is printed once to the log)
    #[arg(long)]
    pub seed_demo: bool,

    /// Upstream MCP server URL for the seeded demo workspace
    #[arg(
        long,
        default_value = "http://localhost:3000/mcp",
        env = "CERBERUS_DEMO_UPSTREAM_URL"
    )]
    pub demo_upstream_url: String,
}
