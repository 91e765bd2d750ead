/// stepline: declarative workflow orchestration
///
/// Main entry point for the stepline server. Loads configuration from the environment
/// and starts the HTTP server with event triggers and workflow listing.

use stepline::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Event triggers at /events/{event_id}
/// - Workflow listing at /api/workflows/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (defaults to 0.0.0.0:3004 and the .stepline directory)
    let config = Config::from_env()?;

    start_server(config).await?;

    Ok(())
}
