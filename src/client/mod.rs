/// Client Registry
///
/// Engine connections keyed by queue name. The default queue is connected eagerly
/// with retries; other queues are connected on first use with a single attempt.
/// Handles are replaced, never mutated.

// Client options and TLS material
pub mod options;

pub use options::{ClientOptions, TlsMaterial, TlsOptions};

use crate::error::{Error, Result};
use crate::runtime::engine::DurableEngine;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Everything a connector needs to dial the engine for one queue
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub host_port: String,
    pub namespace: String,
    /// `pid@host@queue`
    pub identity: String,
    pub queue: String,
    pub tls: Option<TlsMaterial>,
}

/// Dials an execution engine
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, settings: &ConnectionSettings) -> Result<Arc<dyn DurableEngine>>;
}

pub struct ClientRegistry {
    options: ClientOptions,
    tls: Option<TlsMaterial>,
    connector: Arc<dyn Connector>,
    clients: DashMap<String, Arc<dyn DurableEngine>>,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("options", &self.options)
            .field("queues", &self.connected_queues())
            .finish()
    }
}

impl ClientRegistry {
    /// Validate options without connecting anything
    pub fn with_connector(options: ClientOptions, connector: Arc<dyn Connector>) -> Result<Arc<Self>> {
        if options.default_queue.trim().is_empty() {
            return Err(Error::Config("default queue name must not be empty".to_string()));
        }
        let tls = options.tls.resolve()?;

        Ok(Arc::new(Self {
            options,
            tls,
            connector,
            clients: DashMap::new(),
        }))
    }

    /// Validate options and connect the default queue
    ///
    /// Failing to reach the engine is logged, not returned; later lookups for the
    /// default queue fail explicitly instead.
    pub async fn new(options: ClientOptions, connector: Arc<dyn Connector>) -> Result<Arc<Self>> {
        let registry = Self::with_connector(options, connector)?;
        if let Err(e) = registry.ensure_default().await {
            tracing::error!("❌ Default queue bootstrap failed: {}", e);
        }
        Ok(registry)
    }

    /// Connect the default queue in the background
    pub fn spawn_default_bootstrap(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry.ensure_default().await.map(|_| ()).map_err(|e| {
                tracing::error!("❌ Default queue bootstrap failed: {}", e);
                e
            })
        })
    }

    /// Connect the default queue, retrying with a fixed delay
    pub async fn ensure_default(&self) -> Result<Arc<dyn DurableEngine>> {
        let queue = self.options.default_queue.clone();
        if let Some(existing) = self.get(&queue) {
            return Ok(existing);
        }

        let attempts = self.options.connect_attempts.max(1);
        let settings = self.settings_for(&queue);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            match self.connector.connect(&settings).await {
                Ok(engine) => {
                    tracing::info!("🔗 Connected default queue '{}' ({})", queue, settings.identity);
                    return Ok(self.store(&queue, engine));
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Could not connect queue '{}': {}. Retrying (attempt {} of {})",
                        queue,
                        e,
                        attempt,
                        attempts
                    );
                    reason = e.to_string();
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.options.connect_delay).await;
            }
        }

        Err(Error::ConnectionFailed {
            queue,
            attempts,
            reason,
        })
    }

    /// Handle for `queue`, connecting it with a single attempt if needed
    ///
    /// An empty queue name means the default queue.
    pub async fn get_or_create(&self, queue: &str) -> Result<Arc<dyn DurableEngine>> {
        let queue = self.queue_name(queue).to_string();
        if let Some(existing) = self.get(&queue) {
            return Ok(existing);
        }

        let settings = self.settings_for(&queue);
        let engine = self
            .connector
            .connect(&settings)
            .await
            .map_err(|e| Error::ConnectionFailed {
                queue: queue.clone(),
                attempts: 1,
                reason: e.to_string(),
            })?;

        tracing::info!("🔗 Connected queue '{}' ({})", queue, settings.identity);
        Ok(self.store(&queue, engine))
    }

    /// First stored handle wins; later callers get that one
    fn store(&self, queue: &str, engine: Arc<dyn DurableEngine>) -> Arc<dyn DurableEngine> {
        let entry = self.clients.entry(queue.to_string()).or_insert(engine);
        Arc::clone(entry.value())
    }

    pub fn get(&self, queue: &str) -> Option<Arc<dyn DurableEngine>> {
        self.clients
            .get(self.queue_name(queue))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn default_queue(&self) -> &str {
        &self.options.default_queue
    }

    /// Map an empty queue name to the default queue
    pub fn queue_name<'a>(&'a self, queue: &'a str) -> &'a str {
        if queue.trim().is_empty() {
            &self.options.default_queue
        } else {
            queue
        }
    }

    pub fn connected_queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        queues.sort();
        queues
    }

    pub fn settings_for(&self, queue: &str) -> ConnectionSettings {
        ConnectionSettings {
            host_port: self.options.host_port.clone(),
            namespace: self.options.namespace.clone(),
            identity: format!("{}@{}@{}", std::process::id(), host_name(), queue),
            queue: queue.to_string(),
            tls: self.tls.clone(),
        }
    }
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
