pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;

use actix_web::web;
use tokio::runtime::Handle;
use tracing::{error, info};

use crate::infrastructure::{bootstrap, config};
use crate::interfaces::http::start_server;

/// Loads configuration, wires the orchestrator and serves HTTP until shutdown.
pub fn run() -> std::io::Result<()> {
    let _ = dotenvy::dotenv();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let config = config::load().map_err(|err| {
        error!(error = %err, "Failed to load configuration");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string())
    })?;

    actix_web::rt::System::new().block_on(async move {
        let state = bootstrap::setup(config, Handle::current()).map_err(|err| {
            error!(error = %err, "Failed to initialize application state");
            std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
        })?;

        let server = start_server(web::Data::new(state))?;
        server.await?;
        info!("HTTP server stopped");
        Ok(())
    })
}
