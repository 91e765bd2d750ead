/// Event and schedule dispatcher
///
/// Starts runs for every job of every workflow listening to an event, and keeps the
/// engine's schedules in line with the workflows' cron triggers. Each job is attempted
/// independently; failures are collected and returned together.

use crate::client::ClientRegistry;
use crate::dispatch::schedule::{resolve_schedule, ScheduleSpec};
use crate::error::{DispatchError, Error, JobFailure, Result};
use crate::runtime::engine::{RunHandle, ScheduleAction};
use crate::workflow::{Job, WorkflowDefinition, WorkflowRegistry};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    clients: Arc<ClientRegistry>,
    workflows: Arc<WorkflowRegistry>,
}

impl Dispatcher {
    pub fn new(clients: Arc<ClientRegistry>, workflows: Arc<WorkflowRegistry>) -> Self {
        Self { clients, workflows }
    }

    pub fn workflows(&self) -> &WorkflowRegistry {
        &self.workflows
    }

    /// Start one run per job of every workflow listening to `event_id`
    ///
    /// Every job is attempted. If any fails, the error lists the failures and the jobs
    /// that did start.
    pub async fn trigger<T: Serialize + ?Sized>(&self, event_id: &str, payload: &T) -> Result<Vec<RunHandle>> {
        let input = serde_json::to_value(payload)?;
        let definitions = self.workflows.listening_to(event_id);
        tracing::info!(
            "📨 Event '{}' matched {} workflow(s)",
            event_id,
            definitions.len()
        );

        let mut handles = Vec::new();
        let mut outcome = DispatchError::default();

        for definition in &definitions {
            for (job_name, job) in &definition.jobs {
                match self.dispatch_job(job_name, job, input.clone()).await {
                    Ok(handle) => {
                        outcome.succeeded.push(job_name.clone());
                        handles.push(handle);
                    }
                    Err(error) => {
                        tracing::error!(
                            "❌ Failed to start job '{}' of workflow '{}': {}",
                            job_name,
                            definition.name,
                            error
                        );
                        outcome.failures.push(JobFailure {
                            workflow: definition.name.clone(),
                            job: job_name.clone(),
                            error,
                        });
                    }
                }
            }
        }

        if outcome.is_empty() {
            Ok(handles)
        } else {
            Err(Error::Dispatch(outcome))
        }
    }

    async fn dispatch_job(&self, job_name: &str, job: &Job, input: Value) -> Result<RunHandle> {
        let queue = self.clients.queue_name(&job.queue).to_string();
        let engine = self.clients.get_or_create(&queue).await?;
        engine.start_run(job_name, &queue, input).await
    }

    /// Create or update the schedule of every job of every scheduled workflow
    ///
    /// Returns the ids of the schedules that were upserted.
    pub async fn init_schedules(&self) -> Result<Vec<String>> {
        let mut outcome = DispatchError::default();

        for definition in self.workflows.scheduled() {
            let Some(schedule) = definition.cron_schedule() else {
                continue;
            };

            // Resolve once per workflow so every job shares the same expression
            let spec = resolve_schedule(schedule);
            tracing::info!(
                "📅 Workflow '{}' schedule '{}' resolved to '{}'",
                definition.name,
                schedule,
                spec.expression
            );

            self.upsert_workflow_schedules(&definition, &spec, &mut outcome).await;
        }

        if outcome.is_empty() {
            Ok(outcome.succeeded)
        } else {
            Err(Error::Dispatch(outcome))
        }
    }

    async fn upsert_workflow_schedules(
        &self,
        definition: &WorkflowDefinition,
        spec: &ScheduleSpec,
        outcome: &mut DispatchError,
    ) {
        for (job_name, job) in &definition.jobs {
            match self.upsert_schedule(job_name, job, spec).await {
                Ok(()) => outcome.succeeded.push(job_name.clone()),
                Err(error) => {
                    tracing::error!(
                        "❌ Failed to schedule job '{}' of workflow '{}': {}",
                        job_name,
                        definition.name,
                        error
                    );
                    outcome.failures.push(JobFailure {
                        workflow: definition.name.clone(),
                        job: job_name.clone(),
                        error,
                    });
                }
            }
        }
    }

    /// Schedules are keyed by job name
    async fn upsert_schedule(&self, job_name: &str, job: &Job, spec: &ScheduleSpec) -> Result<()> {
        let queue = self.clients.queue_name(&job.queue).to_string();
        let engine = self.clients.get_or_create(&queue).await?;

        let action = ScheduleAction {
            procedure: job_name.to_string(),
            queue,
            input: Value::Null,
        };

        if engine.get_schedule(job_name).await?.is_none() {
            return engine.create_schedule(job_name, &spec.expression, action).await;
        }

        let expression = spec.expression.clone();
        let preserve = spec.preserve_on_update;
        engine
            .update_schedule(
                job_name,
                Box::new(move |mut description| {
                    if !preserve {
                        description.cron_expressions = vec![expression];
                    }
                    description.action = action;
                    description
                }),
            )
            .await
    }
}
