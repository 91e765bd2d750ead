/// Hot-swappable workflow registry using ArcSwap
///
/// Holds the set of loaded workflow definitions. Readers (the dispatcher, the worker,
/// the HTTP API) take lock-free snapshots; a reload swaps the whole set atomically so
/// in-flight dispatches keep the definitions they started with.

use crate::error::Result;
use crate::workflow::{loader, types::WorkflowDefinition};
use arc_swap::ArcSwap;
use std::{path::Path, sync::Arc};

/// Lock-free workflow registry
///
/// Definitions are kept in load order. Two definitions may share a name; lookups by
/// name return the first one.
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Atomic pointer to the current definition set
    workflows: ArcSwap<Vec<Arc<WorkflowDefinition>>>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl WorkflowRegistry {
    pub fn new(definitions: Vec<WorkflowDefinition>) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(wrap(definitions))),
        }
    }

    /// Load every valid workflow file under `dir` into a new registry
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let definitions = loader::read_all_valid_files_in_dir(dir)?;
        Ok(Self::new(definitions))
    }

    /// Replace the whole definition set (hot reload boundary)
    pub fn replace_all(&self, definitions: Vec<WorkflowDefinition>) {
        let count = definitions.len();
        self.workflows.store(Arc::new(wrap(definitions)));
        tracing::info!("🔄 Workflow registry now holds {} definitions", count);
    }

    /// Re-read `dir` and swap in its definitions
    pub fn reload_from_dir(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let definitions = loader::read_all_valid_files_in_dir(dir)?;
        let count = definitions.len();
        self.replace_all(definitions);
        Ok(count)
    }

    /// Snapshot of every loaded definition
    pub fn all(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.workflows.load().iter().cloned().collect()
    }

    /// First definition with the given name
    pub fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows
            .load()
            .iter()
            .find(|definition| definition.name == name)
            .cloned()
    }

    /// Definitions whose trigger set contains `event_id`
    pub fn listening_to(&self, event_id: &str) -> Vec<Arc<WorkflowDefinition>> {
        self.workflows
            .load()
            .iter()
            .filter(|definition| definition.listens_to(event_id))
            .cloned()
            .collect()
    }

    /// Definitions with a non-empty cron schedule
    pub fn scheduled(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.workflows
            .load()
            .iter()
            .filter(|definition| definition.cron_schedule().is_some())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workflows.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn wrap(definitions: Vec<WorkflowDefinition>) -> Vec<Arc<WorkflowDefinition>> {
    definitions.into_iter().map(Arc::new).collect()
}
