/// Step execution engine
///
/// Compiles a job into a single [`Procedure`]. A run walks the job's steps in declared
/// order, builds each step's input from the trigger payload and the outputs of the
/// steps before it, invokes the step's action through the engine, and records the
/// result under the step id for later steps to reference.

use crate::error::{Error, Result};
use crate::integrations::Action;
use crate::runtime::{
    actions::ActionRegistry,
    engine::{ActivityContext, ActivityOptions, Procedure},
    template,
};
use crate::workflow::{Job, Payload, Step};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Accumulated state of one run
///
/// `steps` maps a completed step id to `{ "outputs": <result> }`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunContext {
    pub input: Payload,
    pub steps: Payload,
    completed: Vec<String>,
}

impl RunContext {
    pub fn new(input: Payload) -> Self {
        Self {
            input,
            steps: Payload::new(),
            completed: Vec::new(),
        }
    }

    /// Input context a step's templates resolve against
    pub fn merge_context(&self) -> Payload {
        let mut shared = Payload::new();
        shared.insert("steps".to_string(), Value::Object(self.steps.clone()));
        template::merge_maps(&[&self.input, &shared])
    }

    pub fn record_output(&mut self, step_id: &str, outputs: Payload) {
        self.steps
            .insert(step_id.to_string(), json!({ "outputs": Value::Object(outputs) }));
        if !self.completed.iter().any(|id| id == step_id) {
            self.completed.push(step_id.to_string());
        }
    }

    /// Outputs recorded for a step, if it completed
    pub fn outputs(&self, step_id: &str) -> Option<&Value> {
        self.steps.get(step_id).and_then(|step| step.get("outputs"))
    }

    /// Completed step ids in execution order
    pub fn completed_steps(&self) -> Vec<String> {
        self.completed.clone()
    }
}

/// A step with its action parsed at compile time
#[derive(Debug, Clone)]
struct CompiledStep {
    step: Step,
    action: Action,
    options: ActivityOptions,
}

/// Runnable form of one job
pub struct CompiledJob {
    name: String,
    queue: String,
    steps: Vec<CompiledStep>,
    actions: Arc<ActionRegistry>,
}

impl std::fmt::Debug for CompiledJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledJob")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl CompiledJob {
    /// Compile `job`, verifying every step's action is registered
    pub fn compile(name: &str, job: &Job, actions: Arc<ActionRegistry>) -> Result<Self> {
        let mut steps = Vec::with_capacity(job.steps.len());

        for step in &job.steps {
            let action = Action::parse(&step.action_id)?;
            if actions.lookup(&action).is_none() {
                return Err(Error::UnregisteredActivity {
                    job: name.to_string(),
                    step: step_label(step),
                    action: action.to_string(),
                });
            }

            let options = ActivityOptions {
                declared_timeout: step.timeout.clone().or_else(|| job.timeout.clone()),
                ..ActivityOptions::default()
            };
            steps.push(CompiledStep {
                step: step.clone(),
                action,
                options,
            });
        }

        Ok(Self {
            name: name.to_string(),
            queue: job.queue.clone(),
            steps,
            actions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue declared on the job; empty means the default queue
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Distinct action keys used by this job, in first-use order
    pub fn activity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for compiled in &self.steps {
            let key = compiled.action.to_string();
            if !names.contains(&key) {
                names.push(key);
            }
        }
        names
    }

    /// Override activity options for every step (retry budget, attempt timeout)
    pub fn with_activity_options(mut self, max_attempts: u32, timeout: std::time::Duration) -> Self {
        for compiled in &mut self.steps {
            compiled.options.max_attempts = max_attempts.max(1);
            compiled.options.start_to_close_timeout = timeout;
        }
        self
    }

    /// Run every step and return the final run context
    pub async fn execute(&self, activities: &dyn ActivityContext, input: Value) -> Result<RunContext> {
        let run_start = std::time::Instant::now();
        tracing::info!("🚀 Starting job '{}' with {} steps", self.name, self.steps.len());

        let mut context = RunContext::new(template::to_json_map(&input)?);

        for (index, compiled) in self.steps.iter().enumerate() {
            let step = &compiled.step;
            tracing::info!(
                "📍 Step {}/{}: '{}' ({})",
                index + 1,
                self.steps.len(),
                step_label(step),
                compiled.action
            );

            let step_start = std::time::Instant::now();
            let outputs = self
                .run_step(activities, compiled, &context)
                .await
                .map_err(|source| {
                    tracing::error!(
                        "❌ Job '{}' failed at step '{}': {}",
                        self.name,
                        step_label(step),
                        source
                    );
                    Error::StepExecutionFailed {
                        job: self.name.clone(),
                        step: step.id.clone(),
                        completed_steps: context.completed_steps(),
                        source: Box::new(source),
                    }
                })?;

            context.record_output(&step.id, outputs);
            tracing::info!("✅ Step '{}' completed in {:?}", step.id, step_start.elapsed());
        }

        tracing::info!("🎉 Job '{}' completed in {:?}", self.name, run_start.elapsed());
        Ok(context)
    }

    async fn run_step(
        &self,
        activities: &dyn ActivityContext,
        compiled: &CompiledStep,
        context: &RunContext,
    ) -> Result<Payload> {
        let input = step_input(&compiled.step, context)?;

        let handler = self
            .actions
            .lookup(&compiled.action)
            .ok_or_else(|| Error::ActionNotRegistered(compiled.action.to_string()))?;

        let shown = Value::Object(input.clone());
        tracing::debug!("📥 Step '{}' input: {}", compiled.step.id, shown);

        activities
            .execute_activity(&handler.action().to_string(), input, &compiled.options)
            .await
    }
}

#[async_trait]
impl Procedure for CompiledJob {
    async fn run(&self, activities: &dyn ActivityContext, input: Value) -> Result<()> {
        // The final context is not published to the starter of the run.
        self.execute(activities, input).await.map(|_| ())
    }
}

/// Build the input for one step
///
/// Steps without `with` receive an empty input. Otherwise `with` is rendered against
/// the merge context and laid over it, so declared fields win.
pub fn step_input(step: &Step, context: &RunContext) -> Result<Payload> {
    let Some(with) = &step.with else {
        return Ok(Payload::new());
    };

    let merged = context.merge_context();
    let mut rendered = with.clone();
    template::render_template_fields(&merged, &mut rendered)?;

    Ok(template::merge_maps(&[&merged, &rendered]))
}

fn step_label(step: &Step) -> String {
    if step.name.is_empty() {
        step.id.clone()
    } else {
        format!("{} ({})", step.name, step.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::Integration;
    use std::sync::Mutex;

    /// Records every call; fails verbs listed in `failing`
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Payload)>>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl Integration for Recorder {
        fn id(&self) -> &str {
            "test"
        }

        fn supported_verbs(&self) -> Vec<String> {
            vec!["create".into(), "notify".into(), "explode".into()]
        }

        async fn perform(&self, action: &Action, input: Payload) -> Result<Payload> {
            self.calls.lock().unwrap().push((action.verb.clone(), input.clone()));
            if self.failing.contains(&action.verb) {
                return Err(Error::action_failed(action, "boom"));
            }
            match action.verb.as_str() {
                "create" => Ok(json!({ "id": "abc" }).as_object().cloned().unwrap()),
                _ => Ok(input),
            }
        }
    }

    /// Activity context that calls handlers directly
    struct Direct(Arc<ActionRegistry>);

    #[async_trait]
    impl ActivityContext for Direct {
        async fn execute_activity(&self, name: &str, input: Payload, _options: &ActivityOptions) -> Result<Payload> {
            self.0.resolve(name)?.call(input).await
        }
    }

    fn step(id: &str, action_id: &str, with: Option<Value>) -> Step {
        Step {
            name: String::new(),
            id: id.to_string(),
            action_id: action_id.to_string(),
            timeout: None,
            with: with.map(|w| w.as_object().cloned().unwrap()),
        }
    }

    fn setup(failing: &[&str]) -> (Arc<Recorder>, Arc<ActionRegistry>) {
        let recorder = Arc::new(Recorder {
            calls: Mutex::default(),
            failing: failing.iter().map(|f| f.to_string()).collect(),
        });
        let integration: Arc<dyn Integration> = recorder.clone();
        let registry = Arc::new(ActionRegistry::from_integrations(&[integration]));
        (recorder, registry)
    }

    #[tokio::test]
    async fn later_step_receives_earlier_output() {
        let (recorder, registry) = setup(&[]);
        let job = Job {
            steps: vec![
                step("first", "test:create", Some(json!({}))),
                step(
                    "second",
                    "test:notify",
                    Some(json!({ "ref": "{{ .steps.first.outputs.id }}", "channel": "general" })),
                ),
            ],
            ..Job::default()
        };
        let compiled = CompiledJob::compile("pipeline", &job, Arc::clone(&registry)).unwrap();

        let context = compiled
            .execute(&Direct(registry), json!({ "user": "ada" }))
            .await
            .unwrap();

        let calls = recorder.calls.lock().unwrap();
        let (_, second_input) = &calls[1];
        assert_eq!(second_input["ref"], json!("abc"));
        assert_eq!(second_input["channel"], json!("general"));
        assert_eq!(second_input["user"], json!("ada"));
        assert_eq!(context.outputs("first"), Some(&json!({ "id": "abc" })));
    }

    #[tokio::test]
    async fn with_fields_override_context_fields() {
        let (recorder, registry) = setup(&[]);
        let job = Job {
            steps: vec![step("only", "test:notify", Some(json!({ "user": "grace" })))],
            ..Job::default()
        };
        let compiled = CompiledJob::compile("override", &job, Arc::clone(&registry)).unwrap();

        compiled
            .execute(&Direct(registry), json!({ "user": "ada", "team": "core" }))
            .await
            .unwrap();

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls[0].1["user"], json!("grace"));
        assert_eq!(calls[0].1["team"], json!("core"));
    }

    #[tokio::test]
    async fn step_without_with_gets_empty_input() {
        let (recorder, registry) = setup(&[]);
        let job = Job {
            steps: vec![step("bare", "test:notify", None)],
            ..Job::default()
        };
        let compiled = CompiledJob::compile("bare", &job, Arc::clone(&registry)).unwrap();

        compiled
            .execute(&Direct(registry), json!({ "user": "ada" }))
            .await
            .unwrap();

        assert!(recorder.calls.lock().unwrap()[0].1.is_empty());
    }

    #[tokio::test]
    async fn failing_step_stops_the_run() {
        let (recorder, registry) = setup(&["explode"]);
        let job = Job {
            steps: vec![
                step("one", "test:create", Some(json!({}))),
                step("two", "test:notify", Some(json!({}))),
                step("three", "test:explode", Some(json!({}))),
                step("four", "test:notify", Some(json!({}))),
            ],
            ..Job::default()
        };
        let compiled = CompiledJob::compile("fragile", &job, Arc::clone(&registry)).unwrap();

        let err = compiled
            .execute(&Direct(registry), Value::Null)
            .await
            .unwrap_err();

        match err {
            Error::StepExecutionFailed {
                job,
                step,
                completed_steps,
                ..
            } => {
                assert_eq!(job, "fragile");
                assert_eq!(step, "three");
                assert_eq!(completed_steps, vec!["one".to_string(), "two".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let verbs: Vec<String> = recorder.calls.lock().unwrap().iter().map(|(v, _)| v.clone()).collect();
        assert_eq!(verbs, vec!["create", "notify", "explode"]);
    }

    #[test]
    fn compile_rejects_unregistered_action() {
        let (_, registry) = setup(&[]);
        let job = Job {
            steps: vec![
                step("ok", "test:create", None),
                Step {
                    name: "Post it".to_string(),
                    ..step("post", "slack:send-message", None)
                },
            ],
            ..Job::default()
        };

        let err = CompiledJob::compile("announce", &job, registry).unwrap_err();
        assert!(matches!(
            err,
            Error::UnregisteredActivity { ref job, ref step, ref action }
                if job == "announce" && step == "Post it (post)" && action == "slack:send-message"
        ));
    }

    #[test]
    fn compile_rejects_malformed_action() {
        let (_, registry) = setup(&[]);
        let job = Job {
            steps: vec![step("bad", "test", None)],
            ..Job::default()
        };
        assert!(matches!(
            CompiledJob::compile("bad", &job, registry),
            Err(Error::MalformedActionId(_))
        ));
    }

    #[test]
    fn declared_timeouts_are_carried_through() {
        let (_, registry) = setup(&[]);
        let job = Job {
            timeout: Some("5m".to_string()),
            steps: vec![
                Step {
                    timeout: Some("30s".to_string()),
                    ..step("a", "test:create", None)
                },
                step("b", "test:notify", None),
                step("c", "test:create", None),
            ],
            ..Job::default()
        };
        let compiled = CompiledJob::compile("timed", &job, registry).unwrap();

        assert_eq!(compiled.steps[0].options.declared_timeout.as_deref(), Some("30s"));
        assert_eq!(compiled.steps[1].options.declared_timeout.as_deref(), Some("5m"));
        assert_eq!(compiled.steps[0].options.max_attempts, 1);
        assert_eq!(compiled.activity_names(), vec!["test:create", "test:notify"]);
    }
}
