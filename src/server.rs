/// Server setup and initialization
///
/// Wires together all components: workflow registry, engine clients, worker,
/// dispatcher and HTTP routes. Provides the main application factory function for
/// creating the Axum app.

use crate::{
    api::{create_router, AppState},
    client::ClientRegistry,
    config::Config,
    dispatch::Dispatcher,
    integrations::{EchoIntegration, Integration, SlackIntegration},
    runtime::{LocalEngine, Worker},
    workflow::WorkflowRegistry,
};
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes
///
/// Loads workflows, connects the engine, registers every job with the worker and
/// upserts cron schedules before the router is returned.
pub async fn create_app(config: Config) -> Result<Router> {
    // Ensure workflow directory exists
    tracing::info!("📁 Ensuring workflow directory exists: {}", config.workflows_dir.display());
    std::fs::create_dir_all(&config.workflows_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create workflow directory: {}", e))?;

    tracing::info!("📥 Loading workflows from {}", config.workflows_dir.display());
    let workflows = Arc::new(
        WorkflowRegistry::from_dir(&config.workflows_dir)
            .map_err(|e| anyhow::anyhow!("Failed to load workflows: {}", e))?,
    );
    tracing::info!("📊 Loaded {} workflow(s)", workflows.len());

    // The in-process engine serves every queue
    tracing::info!("⚙️ Initializing local execution engine");
    let engine = LocalEngine::new();

    tracing::info!("🔗 Connecting engine clients ({})", config.client.host_port);
    let clients = ClientRegistry::new(config.client.clone(), Arc::new(engine))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize engine clients: {}", e))?;

    let mut integrations: Vec<Arc<dyn Integration>> = vec![Arc::new(EchoIntegration::new())];
    if let Some(slack) = &config.slack {
        tracing::info!("💬 Slack integration enabled for team {}", slack.team_id);
        integrations.push(Arc::new(SlackIntegration::new(&slack.token, &slack.team_id)));
    }

    tracing::info!("🏗️ Registering jobs with the worker");
    let worker = Worker::builder()
        .queue(clients.default_queue())
        .integrations(integrations)
        .definitions(workflows.all())
        .build(&clients)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start worker: {}", e))?;
    tracing::info!(
        "✅ Worker registered {} job(s), rejected {}",
        worker.registered().len(),
        worker.rejected().len()
    );

    let dispatcher = Dispatcher::new(Arc::clone(&clients), Arc::clone(&workflows));

    // Schedule failures are reported but do not stop the server
    tracing::info!("⏰ Initializing cron schedules");
    match dispatcher.init_schedules().await {
        Ok(ids) => tracing::info!("📅 {} schedule(s) in place", ids.len()),
        Err(e) => tracing::error!("❌ Some schedules could not be initialized: {}", e),
    }

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = create_router(AppState {
        dispatcher,
        workflows,
    });

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
///
/// Creates the application and starts the Axum server on the configured address and port.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting stepline server...");

    let app = create_app(config.clone()).await?;

    // Bind to the configured address
    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
