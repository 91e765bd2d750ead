/// Workflow management layer
///
/// Workflow definitions as loaded from YAML, the loader that reads them from disk,
/// and the hot-swappable registry the rest of the system reads them from.

// Workflow, job and step definitions
pub mod types;

// YAML file loading
pub mod loader;

// Lock-free definition registry using ArcSwap
pub mod registry;

pub use registry::WorkflowRegistry;
pub use types::{CronTrigger, Job, Payload, Step, Triggers, WorkflowDefinition};
