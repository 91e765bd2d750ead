/// Worker bootstrap
///
/// Builds the action registry from the configured integrations, compiles every job of
/// every definition and registers it with the engine serving the job's queue. A job
/// that fails validation is skipped; the others still register.

use crate::client::ClientRegistry;
use crate::error::{Error, Result};
use crate::integrations::Integration;
use crate::runtime::{actions::ActionRegistry, engine::DurableEngine, executor::CompiledJob};
use crate::workflow::WorkflowDefinition;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

/// A job accepted by the worker
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredJob {
    pub workflow: String,
    pub job: String,
    pub queue: String,
}

/// A job the worker skipped, with the reason
#[derive(Debug)]
pub struct RejectedJob {
    pub workflow: String,
    pub job: String,
    pub error: Error,
}

#[derive(Default)]
pub struct WorkerBuilder {
    queue: Option<String>,
    integrations: Vec<Arc<dyn Integration>>,
    definitions: Vec<Arc<WorkflowDefinition>>,
    activity_retries: Option<(u32, Duration)>,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue for jobs that do not name one (defaults to the client registry's default)
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn integration(mut self, integration: Arc<dyn Integration>) -> Self {
        self.integrations.push(integration);
        self
    }

    pub fn integrations(mut self, integrations: impl IntoIterator<Item = Arc<dyn Integration>>) -> Self {
        self.integrations.extend(integrations);
        self
    }

    pub fn definition(mut self, definition: Arc<WorkflowDefinition>) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn definitions(mut self, definitions: impl IntoIterator<Item = Arc<WorkflowDefinition>>) -> Self {
        self.definitions.extend(definitions);
        self
    }

    /// Override the activity retry budget and per-attempt timeout for every step
    pub fn activity_retries(mut self, max_attempts: u32, timeout: Duration) -> Self {
        self.activity_retries = Some((max_attempts, timeout));
        self
    }

    /// Compile and register every job
    ///
    /// Fails with `NoJobsRegistered` when jobs exist and none of them registered.
    pub async fn build(self, clients: &ClientRegistry) -> Result<Worker> {
        let queue = self
            .queue
            .filter(|queue| !queue.trim().is_empty())
            .unwrap_or_else(|| clients.default_queue().to_string());

        let actions = Arc::new(ActionRegistry::from_integrations(&self.integrations));
        tracing::info!(
            "🔌 Worker for queue '{}' serving {} actions: {}",
            queue,
            actions.len(),
            actions.keys().join(", ")
        );

        let mut registered = Vec::new();
        let mut rejected = Vec::new();
        let mut engines: HashMap<String, Arc<dyn DurableEngine>> = HashMap::new();
        let mut activities_by_queue: HashMap<String, HashSet<String>> = HashMap::new();

        for definition in &self.definitions {
            for (job_name, job) in &definition.jobs {
                let job_queue = if job.queue.trim().is_empty() {
                    queue.clone()
                } else {
                    job.queue.clone()
                };

                let outcome = register_job(
                    clients,
                    &actions,
                    job_name,
                    job,
                    &job_queue,
                    self.activity_retries,
                    &mut engines,
                    &mut activities_by_queue,
                )
                .await;

                match outcome {
                    Ok(()) => {
                        tracing::info!(
                            "✅ Registered job '{}' of workflow '{}' on queue '{}'",
                            job_name,
                            definition.name,
                            job_queue
                        );
                        registered.push(RegisteredJob {
                            workflow: definition.name.clone(),
                            job: job_name.clone(),
                            queue: job_queue,
                        });
                    }
                    Err(error) => {
                        tracing::error!(
                            "❌ Skipping job '{}' of workflow '{}': {}",
                            job_name,
                            definition.name,
                            error
                        );
                        rejected.push(RejectedJob {
                            workflow: definition.name.clone(),
                            job: job_name.clone(),
                            error,
                        });
                    }
                }
            }
        }

        if registered.is_empty() && !rejected.is_empty() {
            return Err(Error::NoJobsRegistered {
                failures: rejected.into_iter().map(|job| job.error).collect(),
            });
        }

        tracing::info!(
            "🏁 Worker ready: {} job(s) registered, {} rejected",
            registered.len(),
            rejected.len()
        );

        Ok(Worker {
            queue,
            actions,
            registered,
            rejected,
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn register_job(
    clients: &ClientRegistry,
    actions: &Arc<ActionRegistry>,
    job_name: &str,
    job: &crate::workflow::Job,
    queue: &str,
    activity_retries: Option<(u32, Duration)>,
    engines: &mut HashMap<String, Arc<dyn DurableEngine>>,
    activities_by_queue: &mut HashMap<String, HashSet<String>>,
) -> Result<()> {
    let mut compiled = CompiledJob::compile(job_name, job, Arc::clone(actions))?;
    if let Some((max_attempts, timeout)) = activity_retries {
        compiled = compiled.with_activity_options(max_attempts, timeout);
    }

    let engine = match engines.get(queue) {
        Some(engine) => Arc::clone(engine),
        None => {
            let engine = clients.get_or_create(queue).await?;
            engines.insert(queue.to_string(), Arc::clone(&engine));
            engine
        }
    };

    let registered_activities = activities_by_queue.entry(queue.to_string()).or_default();
    for name in compiled.activity_names() {
        if registered_activities.contains(&name) {
            continue;
        }
        let handler = actions.resolve(&name)?;
        engine.register_activity(&name, Arc::new(handler.clone()));
        registered_activities.insert(name);
    }

    engine.register_procedure(job_name, Arc::new(compiled));
    Ok(())
}

/// A bootstrapped worker
#[derive(Debug)]
pub struct Worker {
    queue: String,
    actions: Arc<ActionRegistry>,
    registered: Vec<RegisteredJob>,
    rejected: Vec<RejectedJob>,
}

impl Worker {
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::new()
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn registered(&self) -> &[RegisteredJob] {
        &self.registered
    }

    pub fn rejected(&self) -> &[RejectedJob] {
        &self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientOptions;
    use crate::integrations::EchoIntegration;
    use crate::runtime::LocalEngine;
    use crate::workflow::loader::parse_yaml;

    fn definition(yaml: &str) -> Arc<WorkflowDefinition> {
        Arc::new(parse_yaml(yaml.as_bytes()).unwrap())
    }

    async fn clients(engine: &LocalEngine) -> Arc<ClientRegistry> {
        ClientRegistry::new(ClientOptions::default(), Arc::new(engine.clone()))
            .await
            .unwrap()
    }

    const MIXED: &str = r#"
name: onboarding
on:
  events: [user.created]
jobs:
  greet:
    steps:
      - id: hello
        actionId: echo:echo
        with:
          message: hi
      - id: again
        actionId: echo:echo
  broken:
    queue: billing
    steps:
      - id: charge
        actionId: stripe:charge
"#;

    #[tokio::test]
    async fn registers_valid_jobs_and_skips_invalid_ones() {
        let engine = LocalEngine::new();
        let clients = clients(&engine).await;

        let worker = Worker::builder()
            .integration(Arc::new(EchoIntegration::new()))
            .definition(definition(MIXED))
            .build(&clients)
            .await
            .unwrap();

        assert_eq!(
            worker.registered(),
            &[RegisteredJob {
                workflow: "onboarding".to_string(),
                job: "greet".to_string(),
                queue: "default".to_string(),
            }]
        );
        assert_eq!(worker.rejected().len(), 1);
        assert!(matches!(
            worker.rejected()[0].error,
            Error::UnregisteredActivity { ref action, .. } if action == "stripe:charge"
        ));

        assert_eq!(engine.procedure_names(), vec!["greet"]);
        assert_eq!(engine.activity_names(), vec!["echo:echo"]);
        // The rejected job's queue is never dialed
        assert_eq!(clients.connected_queues(), vec!["default"]);
    }

    #[tokio::test]
    async fn fails_when_no_job_registers() {
        let engine = LocalEngine::new();
        let clients = clients(&engine).await;

        let err = Worker::builder()
            .definition(definition(MIXED))
            .build(&clients)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoJobsRegistered { ref failures } if failures.len() == 2));
    }

    #[tokio::test]
    async fn empty_worker_is_fine() {
        let engine = LocalEngine::new();
        let clients = clients(&engine).await;

        let worker = Worker::builder().build(&clients).await.unwrap();
        assert!(worker.registered().is_empty());
        assert_eq!(worker.queue(), "default");
    }

    #[tokio::test]
    async fn jobs_register_on_their_own_queue() {
        let engine = LocalEngine::new();
        let clients = clients(&engine).await;

        let worker = Worker::builder()
            .queue("main")
            .integration(Arc::new(EchoIntegration::new()))
            .definition(definition(
                r#"
name: reports
jobs:
  daily:
    queue: reports
    steps:
      - id: say
        actionId: echo:echo
  adhoc:
    steps:
      - id: say
        actionId: echo:echo
"#,
            ))
            .build(&clients)
            .await
            .unwrap();

        let queues: Vec<(&str, &str)> = worker
            .registered()
            .iter()
            .map(|job| (job.job.as_str(), job.queue.as_str()))
            .collect();
        assert_eq!(queues, vec![("adhoc", "main"), ("daily", "reports")]);
        assert_eq!(clients.connected_queues(), vec!["default", "main", "reports"]);
    }
}
