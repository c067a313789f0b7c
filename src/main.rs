//! p2pjson server
//!
//! Speaks the P2PJSON protocol to a parent process over stdin/stdout, or
//! to any number of clients over TCP.
//!
//! Features:
//! - Concurrent requests in both directions on one stream
//! - Responses correlated by identifier, in any order
//! - Built-in `/ping` and `/echo` routes
//! - Configuration via CLI arguments or TOML file

mod config;
mod handlers;
mod server;

use config::Config;
use server::Server;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging. stdout may carry the protocol, so logs go to stderr.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        transport = ?config.transport,
        listen = %config.listen,
        max_connections = config.max_connections,
        max_body_size = config.max_body_size,
        "Starting p2pjson server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let server = Server::new(config, handlers::router());
    let result = runtime.block_on(server.run());

    // A blocking stdin read may still be parked; don't wait for it.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}
