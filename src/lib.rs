/// stepline: declarative workflow orchestration
///
/// Compiles YAML workflow definitions into sequential step procedures, threads data
/// between steps, routes each step to an integration action and starts runs from
/// events or cron schedules on top of a durable execution engine.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// Workflow management layer - definitions, YAML loading and the hot-swappable registry
pub mod workflow;

// Integrations exposing actions to steps
pub mod integrations;

// Runtime - step execution, engine contract, in-process engine and worker bootstrap
pub mod runtime;

// Engine client registry keyed by queue
pub mod client;

// Event and schedule dispatch
pub mod dispatch;

// HTTP API layer - event triggers and workflow listing
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use client::ClientRegistry;
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use runtime::{LocalEngine, Worker};
pub use server::start_server;
pub use workflow::{WorkflowDefinition, WorkflowRegistry};
