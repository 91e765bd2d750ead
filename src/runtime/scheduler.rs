/// Background cron scheduler service
///
/// Wraps tokio-cron-scheduler for the in-process engine. Cron jobs are tracked by
/// key so a schedule can be replaced or removed without restarting the scheduler.

use crate::error::{Error, Result};
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Callback invoked on every tick with the key it was registered under
pub type TickCallback = Arc<dyn Fn(String) -> TickFuture + Send + Sync>;

pub type TickFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Hot-reload cron scheduler service
///
/// The underlying `JobScheduler` is created and started on first use.
#[derive(Default)]
pub struct CronSchedulerService {
    scheduler: RwLock<Option<JobScheduler>>,
    job_uuid_map: RwLock<HashMap<String, Uuid>>, // Track job UUIDs for proper removal
}

impl CronSchedulerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and start the scheduler if it is not running yet
    async fn ensure_started(&self) -> Result<()> {
        if self.scheduler.read().await.is_some() {
            return Ok(());
        }

        let mut guard = self.scheduler.write().await;
        if guard.is_none() {
            tracing::info!("⏰ Starting cron scheduler");
            let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;
            scheduler.start().await.map_err(scheduler_error)?;
            *guard = Some(scheduler);
        }
        Ok(())
    }

    /// Register `cron` under `key`, replacing any job already registered there
    ///
    /// The expression is validated before the existing job is touched, so a
    /// rejected update leaves the previous job running.
    pub async fn add_or_update(&self, key: &str, cron: &str, on_tick: TickCallback) -> Result<()> {
        let job = build_job(key, cron, on_tick)?;
        self.install(key, job).await
    }

    /// Add a built job under `key` and retire the job it replaces
    pub async fn install(&self, key: &str, job: Job) -> Result<()> {
        self.ensure_started().await?;

        let guard = self.scheduler.read().await;
        let scheduler = guard
            .as_ref()
            .ok_or_else(|| Error::Engine("cron scheduler is not running".to_string()))?;
        let job_uuid = scheduler.add(job).await.map_err(scheduler_error)?;

        let previous = self.job_uuid_map.write().await.insert(key.to_string(), job_uuid);
        if let Some(previous) = previous {
            if let Err(e) = scheduler.remove(&previous).await {
                tracing::warn!("⚠️ Failed to remove replaced job {} from scheduler: {}", key, e);
            }
        }

        tracing::debug!("📝 Registered cron job {}", key);
        Ok(())
    }

    pub async fn keys(&self) -> Vec<String> {
        self.job_uuid_map.read().await.keys().cloned().collect()
    }

    /// Remove the job registered under `key`, if any
    pub async fn remove(&self, key: &str) {
        let Some(job_uuid) = self.job_uuid_map.write().await.remove(key) else {
            return;
        };

        let guard = self.scheduler.read().await;
        if let Some(scheduler) = guard.as_ref() {
            if let Err(e) = scheduler.remove(&job_uuid).await {
                tracing::warn!("⚠️ Failed to remove job {} from scheduler: {}", key, e);
            } else {
                tracing::debug!("🛑 Removed cron job from scheduler: {}", key);
            }
        }
    }

    /// Remove every job whose key starts with `prefix` and is not listed in `keep`
    pub async fn remove_prefixed(&self, prefix: &str, keep: &[String]) {
        let keys: Vec<String> = self
            .job_uuid_map
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix) && !keep.contains(key))
            .cloned()
            .collect();

        for key in keys {
            self.remove(&key).await;
        }
    }

    pub async fn job_count(&self) -> usize {
        self.job_uuid_map.read().await.len()
    }

    /// Stop the scheduler and forget every job
    pub async fn stop(&self) -> Result<()> {
        self.job_uuid_map.write().await.clear();

        if let Some(mut scheduler) = self.scheduler.write().await.take() {
            tracing::info!("⏹️ Stopping cron scheduler");
            scheduler.shutdown().await.map_err(scheduler_error)?;
        }
        Ok(())
    }
}

/// Validate `cron` and build the job that calls `on_tick` with `key`
pub fn build_job(key: &str, cron: &str, on_tick: TickCallback) -> Result<Job> {
    let expression = to_scheduler_expression(cron)?;
    let key_owned = key.to_string();

    Job::new_async(expression.as_str(), move |_uuid, _l| {
        let key = key_owned.clone();
        let on_tick = Arc::clone(&on_tick);
        Box::pin(async move {
            tracing::debug!("🔔 Cron trigger activated: {}", key);
            on_tick(key).await;
        })
    })
    .map_err(|e| Error::Engine(format!("invalid cron expression '{}': {}", cron, e)))
}

/// Convert a cron expression to the seconds-first form the scheduler expects
///
/// Five-field expressions get a leading `0` seconds field; six- and seven-field
/// expressions are passed through.
pub fn to_scheduler_expression(cron: &str) -> Result<String> {
    let trimmed = cron.trim();
    match trimmed.split_whitespace().count() {
        5 => Ok(format!("0 {}", trimmed)),
        6 | 7 => Ok(trimmed.to_string()),
        _ => Err(Error::Engine(format!("invalid cron expression '{}'", cron))),
    }
}

fn scheduler_error(e: impl std::fmt::Display) -> Error {
    Error::Engine(format!("scheduler error: {}", e))
}
