//! # Hello Server - Entry Point
//! src/main.rs
//!
//! Parsea la configuración (CLI + env), inicializa el logging y corre el
//! servidor en el thread principal. Ctrl-C dispara `stop()`.

use hello_server::config::Config;
use hello_server::server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    let config = Config::new();

    // RUST_LOG tiene prioridad sobre --log-level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(2);
    }
    config.log_summary();

    let server = Server::new(config);

    let handle = server.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Ctrl-C received");
        handle.stop();
    }) {
        error!(error = %e, "Failed to install Ctrl-C handler");
    }

    // Bloquea hasta que stop() termine el accept loop
    if let Err(e) = server.start() {
        error!(error = %e, "Fatal error");
        std::process::exit(1);
    }
}
