/// Durable execution engine contract
///
/// The orchestration layer never persists runs itself. It compiles jobs into
/// [`Procedure`]s, registers them and their activity handlers with an engine, and asks
/// the engine to start runs and maintain schedules. Any engine that implements
/// [`DurableEngine`] can sit underneath; [`crate::runtime::local::LocalEngine`] is the
/// in-process implementation.

use crate::error::{Error, Result};
use crate::workflow::Payload;
use async_trait::async_trait;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Default bound on a single activity attempt
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// A compiled, runnable unit registered with the engine under a name
#[async_trait]
pub trait Procedure: Send + Sync {
    /// Execute one run. Activities are invoked through `activities` so the engine can
    /// apply its retry and timeout policy to every call.
    async fn run(&self, activities: &dyn ActivityContext, input: Value) -> Result<()>;
}

/// Handler invoked by the engine for a named activity
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn handle(&self, input: Payload) -> Result<Payload>;
}

/// Activity invocation surface a running procedure sees
#[async_trait]
pub trait ActivityContext: Send + Sync {
    async fn execute_activity(
        &self,
        name: &str,
        input: Payload,
        options: &ActivityOptions,
    ) -> Result<Payload>;
}

/// Per-call activity options
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    /// Attempts including the first one; 1 disables retries
    pub max_attempts: u32,
    /// Bound on a single attempt
    pub start_to_close_timeout: Duration,
    /// Timeout string declared on the step or job, handed to the engine as-is
    pub declared_timeout: Option<String>,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            start_to_close_timeout: DEFAULT_ACTIVITY_TIMEOUT,
            declared_timeout: None,
        }
    }
}

/// What a schedule starts when it fires
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleAction {
    pub procedure: String,
    pub queue: String,
    pub input: Value,
}

/// Current state of a schedule as reported by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDescription {
    pub id: String,
    pub cron_expressions: Vec<String>,
    pub action: ScheduleAction,
}

/// Mutation applied by [`DurableEngine::update_schedule`]
pub type ScheduleUpdate = Box<dyn FnOnce(ScheduleDescription) -> ScheduleDescription + Send>;

/// Handle to a started run
#[derive(Debug)]
pub struct RunHandle {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub queue: String,
    outcome: Option<oneshot::Receiver<Result<()>>>,
}

impl RunHandle {
    pub fn new(workflow_id: impl Into<String>, run_id: Uuid, queue: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id,
            queue: queue.into(),
            outcome: None,
        }
    }

    /// Attach the channel the engine reports the run's outcome on
    pub fn with_outcome(mut self, outcome: oneshot::Receiver<Result<()>>) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Wait for the run to finish
    ///
    /// Engines that do not report outcomes to the starter return an error.
    pub async fn wait(self) -> Result<()> {
        let outcome = self.outcome.ok_or_else(|| {
            Error::Engine(format!("run {} does not report its outcome", self.run_id))
        })?;
        outcome
            .await
            .map_err(|_| Error::Engine(format!("run {} was cancelled", self.run_id)))?
    }
}

/// Operations consumed from the execution engine
#[async_trait]
pub trait DurableEngine: Send + Sync {
    /// Start a run of a registered procedure on a task queue
    async fn start_run(&self, procedure: &str, queue: &str, input: Value) -> Result<RunHandle>;

    fn register_procedure(&self, name: &str, procedure: Arc<dyn Procedure>);

    fn register_activity(&self, name: &str, handler: Arc<dyn ActivityHandler>);

    async fn create_schedule(&self, id: &str, cron: &str, action: ScheduleAction) -> Result<()>;

    async fn get_schedule(&self, id: &str) -> Result<Option<ScheduleDescription>>;

    async fn update_schedule(&self, id: &str, update: ScheduleUpdate) -> Result<()>;
}
