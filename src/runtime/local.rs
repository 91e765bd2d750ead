/// In-process execution engine
///
/// Implements the engine contract without durability: procedures and activities live
/// in concurrent maps, every run is a tokio task, and schedules fire from the cron
/// scheduler service. Useful for the binary's standalone mode and for tests.

use crate::client::{ConnectionSettings, Connector};
use crate::error::{Error, Result};
use crate::runtime::engine::{
    ActivityContext, ActivityHandler, ActivityOptions, DurableEngine, Procedure, RunHandle,
    ScheduleAction, ScheduleDescription, ScheduleUpdate,
};
use crate::runtime::scheduler::{build_job, CronSchedulerService, TickCallback, TickFuture};
use crate::workflow::Payload;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::{sync::oneshot, task::AbortHandle};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct LocalEngine {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    procedures: DashMap<String, Arc<dyn Procedure>>,
    activities: DashMap<String, Arc<dyn ActivityHandler>>,
    schedules: DashMap<String, ScheduleDescription>,
    runs: DashMap<Uuid, AbortHandle>,
    cron: CronSchedulerService,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort a running run. Returns false when the run is unknown or already finished.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.inner.runs.remove(&run_id) {
            Some((_, handle)) => {
                handle.abort();
                tracing::info!("🛑 Cancelled run {}", run_id);
                true
            }
            None => false,
        }
    }

    pub fn active_runs(&self) -> usize {
        self.inner.runs.len()
    }

    pub fn procedure_names(&self) -> Vec<String> {
        sorted_keys(&self.inner.procedures)
    }

    pub fn activity_names(&self) -> Vec<String> {
        sorted_keys(&self.inner.activities)
    }

    pub fn schedule_ids(&self) -> Vec<String> {
        sorted_keys(&self.inner.schedules)
    }

    /// Stop firing schedules; runs already started keep going
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.cron.stop().await
    }
}

impl Inner {
    fn start_run(self: &Arc<Self>, procedure_name: &str, queue: &str, input: Value) -> Result<RunHandle> {
        let procedure = self
            .procedures
            .get(procedure_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::Engine(format!("procedure '{}' is not registered", procedure_name)))?;

        let run_id = Uuid::new_v4();
        let workflow_id = format!("{}-{}", procedure_name, run_id);
        let (tx, rx) = oneshot::channel();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let inner = Arc::clone(self);
        let name = procedure_name.to_string();
        let task = tokio::spawn(async move {
            // Hold until the abort handle is tracked so the removal below always finds it
            let _ = registered_rx.await;

            let activities = LocalActivities {
                inner: Arc::clone(&inner),
            };
            let result = procedure.run(&activities, input).await;
            inner.runs.remove(&run_id);

            match &result {
                Ok(()) => tracing::info!("✅ Run {} of '{}' completed", run_id, name),
                Err(e) => tracing::error!("❌ Run {} of '{}' failed: {}", run_id, name, e),
            }
            // The starter may have dropped its handle
            let _ = tx.send(result);
        });

        self.runs.insert(run_id, task.abort_handle());
        let _ = registered_tx.send(());

        tracing::info!("▶️ Started run {} of '{}' on queue '{}'", run_id, procedure_name, queue);
        Ok(RunHandle::new(workflow_id, run_id, queue).with_outcome(rx))
    }

    /// Point the schedule's cron jobs at `expressions`
    ///
    /// Every expression is validated before any running job is replaced.
    async fn register_cron(self: &Arc<Self>, id: &str, expressions: &[String]) -> Result<()> {
        let prefix = cron_key_prefix(id);
        let mut jobs = Vec::with_capacity(expressions.len());
        for (index, expression) in expressions.iter().enumerate() {
            let key = format!("{}{}", prefix, index);
            let job = build_job(&key, expression, schedule_tick(Arc::downgrade(self), id.to_string()))?;
            jobs.push((key, job));
        }

        let keys: Vec<String> = jobs.iter().map(|(key, _)| key.clone()).collect();
        for (key, job) in jobs {
            self.cron.install(&key, job).await?;
        }

        self.cron.remove_prefixed(&prefix, &keys).await;
        Ok(())
    }
}

/// Build the callback a schedule's cron jobs invoke
///
/// The schedule's current action is read on every tick.
fn schedule_tick(engine: Weak<Inner>, schedule_id: String) -> TickCallback {
    Arc::new(move |_key: String| -> TickFuture {
        let engine = engine.clone();
        let schedule_id = schedule_id.clone();
        Box::pin(async move {
            let Some(inner) = engine.upgrade() else {
                return;
            };
            let Some(action) = inner
                .schedules
                .get(&schedule_id)
                .map(|entry| entry.action.clone())
            else {
                tracing::warn!("⚠️ Schedule '{}' fired but no longer exists", schedule_id);
                return;
            };

            tracing::info!("⏰ Schedule '{}' fired", schedule_id);
            if let Err(e) = inner.start_run(&action.procedure, &action.queue, action.input) {
                tracing::error!("❌ Schedule '{}' failed to start a run: {}", schedule_id, e);
            }
        })
    })
}

fn cron_key_prefix(schedule_id: &str) -> String {
    format!("{}#", schedule_id)
}

fn sorted_keys<V>(map: &DashMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = map.iter().map(|entry| entry.key().clone()).collect();
    keys.sort();
    keys
}

/// Activity surface handed to procedures running on the local engine
struct LocalActivities {
    inner: Arc<Inner>,
}

#[async_trait]
impl ActivityContext for LocalActivities {
    async fn execute_activity(
        &self,
        name: &str,
        input: Payload,
        options: &ActivityOptions,
    ) -> Result<Payload> {
        let handler = self
            .inner
            .activities
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::ActionNotRegistered(name.to_string()))?;

        let attempts = options.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let outcome =
                tokio::time::timeout(options.start_to_close_timeout, handler.handle(input.clone())).await;

            let error = match outcome {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(e)) => e,
                Err(_) => Error::ActivityTimeout {
                    activity: name.to_string(),
                    timeout: options.start_to_close_timeout,
                },
            };

            if attempt < attempts {
                tracing::warn!(
                    "🔄 Activity '{}' attempt {}/{} failed: {}",
                    name,
                    attempt,
                    attempts,
                    error
                );
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| Error::Engine(format!("activity '{}' never ran", name))))
    }
}

#[async_trait]
impl DurableEngine for LocalEngine {
    async fn start_run(&self, procedure: &str, queue: &str, input: Value) -> Result<RunHandle> {
        self.inner.start_run(procedure, queue, input)
    }

    fn register_procedure(&self, name: &str, procedure: Arc<dyn Procedure>) {
        tracing::debug!("📝 Registered procedure '{}'", name);
        self.inner.procedures.insert(name.to_string(), procedure);
    }

    fn register_activity(&self, name: &str, handler: Arc<dyn ActivityHandler>) {
        tracing::debug!("📝 Registered activity '{}'", name);
        self.inner.activities.insert(name.to_string(), handler);
    }

    async fn create_schedule(&self, id: &str, cron: &str, action: ScheduleAction) -> Result<()> {
        if self.inner.schedules.contains_key(id) {
            return Err(Error::Engine(format!("schedule '{}' already exists", id)));
        }

        let expressions = vec![cron.to_string()];
        self.inner.register_cron(id, &expressions).await?;
        self.inner.schedules.insert(
            id.to_string(),
            ScheduleDescription {
                id: id.to_string(),
                cron_expressions: expressions,
                action,
            },
        );

        tracing::info!("📅 Created schedule '{}' ({})", id, cron);
        Ok(())
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<ScheduleDescription>> {
        Ok(self.inner.schedules.get(id).map(|entry| entry.value().clone()))
    }

    async fn update_schedule(&self, id: &str, update: ScheduleUpdate) -> Result<()> {
        let current = self
            .inner
            .schedules
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::ScheduleNotFound(id.to_string()))?;

        let mut updated = update(current.clone());
        updated.id = id.to_string();

        if updated.cron_expressions != current.cron_expressions {
            self.inner.register_cron(id, &updated.cron_expressions).await?;
            tracing::info!(
                "🔄 Schedule '{}' now runs at {}",
                id,
                updated.cron_expressions.join(" | ")
            );
        }

        self.inner.schedules.insert(id.to_string(), updated);
        tracing::debug!("📝 Updated schedule '{}'", id);
        Ok(())
    }
}

#[async_trait]
impl Connector for LocalEngine {
    async fn connect(&self, settings: &ConnectionSettings) -> Result<Arc<dyn DurableEngine>> {
        tracing::debug!(
            "🔗 Local engine serving queue '{}' as {}",
            settings.queue,
            settings.identity
        );
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails until the configured attempt, then echoes its input
    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl ActivityHandler for Flaky {
        async fn handle(&self, input: Payload) -> Result<Payload> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < self.succeed_on {
                return Err(Error::action_failed("test:flaky", format!("attempt {}", call)));
            }
            Ok(input)
        }
    }

    struct Slow;

    #[async_trait]
    impl ActivityHandler for Slow {
        async fn handle(&self, _input: Payload) -> Result<Payload> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Payload::new())
        }
    }

    /// Calls one activity with the given options
    struct CallOnce {
        activity: &'static str,
        options: ActivityOptions,
    }

    #[async_trait]
    impl Procedure for CallOnce {
        async fn run(&self, activities: &dyn ActivityContext, input: Value) -> Result<()> {
            let input = input.as_object().cloned().unwrap_or_default();
            activities
                .execute_activity(self.activity, input, &self.options)
                .await
                .map(|_| ())
        }
    }

    /// Reports its name on every run
    struct Recording {
        name: &'static str,
        runs: tokio::sync::mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Procedure for Recording {
        async fn run(&self, _activities: &dyn ActivityContext, _input: Value) -> Result<()> {
            let _ = self.runs.send(self.name.to_string());
            Ok(())
        }
    }

    fn options(max_attempts: u32, timeout: Duration) -> ActivityOptions {
        ActivityOptions {
            max_attempts,
            start_to_close_timeout: timeout,
            declared_timeout: None,
        }
    }

    fn action(procedure: &str) -> ScheduleAction {
        ScheduleAction {
            procedure: procedure.to_string(),
            queue: "default".to_string(),
            input: json!({}),
        }
    }

    #[tokio::test]
    async fn retries_until_attempts_are_exhausted() {
        let engine = LocalEngine::new();
        let flaky = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        });
        engine.register_activity("test:flaky", flaky.clone());
        engine.register_procedure(
            "twice",
            Arc::new(CallOnce {
                activity: "test:flaky",
                options: options(2, Duration::from_secs(5)),
            }),
        );
        engine.register_procedure(
            "thrice",
            Arc::new(CallOnce {
                activity: "test:flaky",
                options: options(3, Duration::from_secs(5)),
            }),
        );

        let first = engine.start_run("twice", "default", json!({})).await.unwrap();
        assert!(matches!(first.wait().await, Err(Error::ActionFailed { .. })));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);

        flaky.calls.store(0, Ordering::SeqCst);
        let second = engine.start_run("thrice", "default", json!({})).await.unwrap();
        second.wait().await.unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempt_timeout_fails_the_call() {
        let engine = LocalEngine::new();
        engine.register_activity("test:slow", Arc::new(Slow));
        engine.register_procedure(
            "slow",
            Arc::new(CallOnce {
                activity: "test:slow",
                options: options(1, Duration::from_millis(20)),
            }),
        );

        let handle = engine.start_run("slow", "default", json!({})).await.unwrap();
        assert!(matches!(
            handle.wait().await,
            Err(Error::ActivityTimeout { ref activity, .. }) if activity == "test:slow"
        ));
    }

    #[tokio::test]
    async fn cancel_aborts_a_running_run() {
        let engine = LocalEngine::new();
        engine.register_activity("test:slow", Arc::new(Slow));
        engine.register_procedure(
            "slow",
            Arc::new(CallOnce {
                activity: "test:slow",
                options: options(1, Duration::from_secs(120)),
            }),
        );

        let handle = engine.start_run("slow", "default", json!({})).await.unwrap();
        assert_eq!(engine.active_runs(), 1);
        assert!(engine.cancel(handle.run_id));
        assert!(!engine.cancel(handle.run_id));
        assert!(matches!(handle.wait().await, Err(Error::Engine(_))));
    }

    #[tokio::test]
    async fn unknown_procedure_and_activity() {
        let engine = LocalEngine::new();
        assert!(matches!(
            engine.start_run("missing", "default", json!({})).await,
            Err(Error::Engine(_))
        ));

        engine.register_procedure(
            "orphan",
            Arc::new(CallOnce {
                activity: "test:none",
                options: ActivityOptions::default(),
            }),
        );
        let handle = engine.start_run("orphan", "default", json!({})).await.unwrap();
        assert!(matches!(
            handle.wait().await,
            Err(Error::ActionNotRegistered(ref name)) if name == "test:none"
        ));
    }

    #[tokio::test]
    async fn schedules_are_created_once_and_updated_in_place() {
        let engine = LocalEngine::new();

        engine.create_schedule("nightly", "0 3 * * *", action("nightly")).await.unwrap();
        assert!(engine.create_schedule("nightly", "0 4 * * *", action("nightly")).await.is_err());

        engine
            .update_schedule(
                "nightly",
                Box::new(|mut description| {
                    description.action.input = json!({ "reason": "update" });
                    description
                }),
            )
            .await
            .unwrap();

        let description = engine.get_schedule("nightly").await.unwrap().unwrap();
        assert_eq!(description.cron_expressions, vec!["0 3 * * *".to_string()]);
        assert_eq!(description.action.input, json!({ "reason": "update" }));

        engine
            .update_schedule(
                "nightly",
                Box::new(|mut description| {
                    description.cron_expressions = vec!["30 2 * * *".to_string()];
                    description
                }),
            )
            .await
            .unwrap();
        let description = engine.get_schedule("nightly").await.unwrap().unwrap();
        assert_eq!(description.cron_expressions, vec!["30 2 * * *".to_string()]);
        assert_eq!(engine.inner.cron.job_count().await, 1);

        assert!(matches!(
            engine.update_schedule("weekly", Box::new(|d| d)).await,
            Err(Error::ScheduleNotFound(ref id)) if id == "weekly"
        ));
        assert!(engine.get_schedule("weekly").await.unwrap().is_none());

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_cron_is_not_stored() {
        let engine = LocalEngine::new();
        assert!(engine.create_schedule("broken", "whenever", action("broken")).await.is_err());
        assert!(engine.schedule_ids().is_empty());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_cron_update_keeps_the_previous_jobs() {
        let engine = LocalEngine::new();
        engine.create_schedule("nightly", "0 3 * * *", action("nightly")).await.unwrap();

        let result = engine
            .update_schedule(
                "nightly",
                Box::new(|mut description| {
                    description.cron_expressions = vec!["61 * * * *".to_string()];
                    description
                }),
            )
            .await;
        assert!(result.is_err());

        let description = engine.get_schedule("nightly").await.unwrap().unwrap();
        assert_eq!(description.cron_expressions, vec!["0 3 * * *".to_string()]);
        assert_eq!(engine.inner.cron.keys().await, vec!["nightly#0".to_string()]);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shrinking_cron_list_drops_extra_jobs() {
        let engine = LocalEngine::new();
        engine.create_schedule("nightly", "0 3 * * *", action("nightly")).await.unwrap();

        engine
            .update_schedule(
                "nightly",
                Box::new(|mut description| {
                    description.cron_expressions = vec!["0 1 * * *".to_string(), "0 2 * * *".to_string()];
                    description
                }),
            )
            .await
            .unwrap();
        assert_eq!(engine.inner.cron.job_count().await, 2);

        engine
            .update_schedule(
                "nightly",
                Box::new(|mut description| {
                    description.cron_expressions = vec!["0 4 * * *".to_string()];
                    description
                }),
            )
            .await
            .unwrap();
        assert_eq!(engine.inner.cron.keys().await, vec!["nightly#0".to_string()]);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn tick_starts_the_current_action() {
        let engine = LocalEngine::new();
        let (runs, mut started) = tokio::sync::mpsc::unbounded_channel();
        engine.register_procedure("first", Arc::new(Recording { name: "first", runs: runs.clone() }));
        engine.register_procedure("second", Arc::new(Recording { name: "second", runs }));

        engine.create_schedule("nightly", "0 3 * * *", action("first")).await.unwrap();
        engine
            .update_schedule(
                "nightly",
                Box::new(|mut description| {
                    description.action.procedure = "second".to_string();
                    description
                }),
            )
            .await
            .unwrap();

        let tick = schedule_tick(Arc::downgrade(&engine.inner), "nightly".to_string());
        tick("nightly#0".to_string()).await;
        assert_eq!(started.recv().await, Some("second".to_string()));

        // Ticks for a removed schedule start nothing
        let orphan = schedule_tick(Arc::downgrade(&engine.inner), "weekly".to_string());
        orphan("weekly#0".to_string()).await;
        assert!(started.try_recv().is_err());

        engine.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn finished_runs_are_never_left_tracked() {
        let engine = LocalEngine::new();
        let (runs, _started) = tokio::sync::mpsc::unbounded_channel();
        engine.register_procedure("instant", Arc::new(Recording { name: "instant", runs }));

        let mut handles = Vec::new();
        for _ in 0..2000 {
            handles.push(engine.start_run("instant", "default", json!({})).await.unwrap());
        }

        let mut finished = Vec::new();
        for handle in handles {
            let run_id = handle.run_id;
            handle.wait().await.unwrap();
            finished.push(run_id);
        }

        assert_eq!(engine.active_runs(), 0);
        assert!(finished.iter().all(|run_id| !engine.cancel(*run_id)));
    }
}
