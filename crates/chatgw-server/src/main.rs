//! chatgw-server: stateful HTTP/JSON chat gateway.
//!
//! Exposes a JSON API to browser clients and multiplexes each user's
//! commands and notifications over one persistent line-delimited TCP
//! connection to the backend chat server.

mod api;
mod config;
mod server;
mod session;

use clap::Parser;
use config::GatewayConfig;
use std::path::PathBuf;
use tracing::{error, info};

/// chatgw-server — HTTP to TCP chat gateway
#[derive(Parser, Debug)]
#[command(name = "chatgw-server", version, about = "HTTP to TCP chat gateway")]
struct Cli {
    /// HTTP listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend chat server host
    #[arg(long)]
    backend_host: Option<String>,

    /// Backend chat server port
    #[arg(long)]
    backend_port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.chatgw/config.toml")]
    config: String,

    /// Maximum concurrent user sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting chatgw-server");

    let config_path = PathBuf::from(&cli.config);
    let config = match GatewayConfig::load(
        Some(&config_path),
        cli.port,
        cli.backend_host.as_deref(),
        cli.backend_port,
        cli.max_sessions,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    if let Err(e) = server::run(config).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("chatgw-server stopped");
}
