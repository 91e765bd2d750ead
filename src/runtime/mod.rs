/// Runtime Execution Engine
///
/// Compiles jobs into procedures and runs them on an execution engine:
/// - Action registry mapping `integrationId:verb` to handlers
/// - Step execution with template rendering between steps
/// - Engine contract and the in-process implementation
/// - Worker bootstrap registering jobs per queue

// Action registry built from integrations
pub mod actions;

// Engine contract consumed by the orchestration layer
pub mod engine;

// Step-by-step job execution
pub mod executor;

// In-process engine
pub mod local;

// Background cron scheduler service backing local schedules
pub mod scheduler;

// `{{ path }}` rendering of step inputs
pub mod template;

// Worker bootstrap
pub mod worker;

// Re-export main types
pub use actions::{ActionHandler, ActionRegistry};
pub use engine::{
    ActivityContext, ActivityHandler, ActivityOptions, DurableEngine, Procedure, RunHandle,
    ScheduleAction, ScheduleDescription, ScheduleUpdate,
};
pub use executor::{CompiledJob, RunContext};
pub use local::LocalEngine;
pub use scheduler::CronSchedulerService;
pub use worker::{Worker, WorkerBuilder};
