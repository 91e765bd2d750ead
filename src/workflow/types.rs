/// Core workflow type definitions
///
/// Defines workflow definitions, jobs and steps as they appear in workflow YAML files.
/// These types are immutable once loaded; the runtime compiles them into procedures.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// String-keyed mapping used for run inputs, step inputs and step outputs.
pub type Payload = Map<String, Value>;

/// A complete workflow definition loaded from one YAML document
///
/// A definition groups jobs under a common set of triggers. Each job compiles into
/// one runnable procedure registered under the job name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name (e.g., "user-onboarding")
    pub name: String,
    /// Events and schedule that start this workflow's jobs
    #[serde(default)]
    pub on: Triggers,
    /// Jobs keyed by job name, unique within the definition
    #[serde(default)]
    pub jobs: BTreeMap<String, Job>,
}

/// Trigger configuration (`on:` block)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Triggers {
    /// Event identifiers that start every job of the workflow (e.g., "user:create")
    #[serde(default)]
    pub events: Vec<String>,
    /// Optional cron trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<CronTrigger>,
}

/// Scheduled trigger
///
/// `schedule` is either a literal cron expression ("0 9 * * *") or one of the
/// symbolic classes `random-15-min`, `random-hourly`, `random-daily`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CronTrigger {
    #[serde(default)]
    pub schedule: String,
}

/// An ordered list of steps executed on one task queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Logical task-queue name; empty means the client's default queue
    #[serde(default)]
    pub queue: String,
    /// Passed through to the engine uninterpreted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Steps in execution order
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One action invocation inside a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Unique within the job; later steps read this step's output at `steps.<id>.outputs`
    pub id: String,
    /// Action identifier in the form `integrationId:verb` (e.g., "slack:send-message")
    #[serde(rename = "actionId")]
    pub action_id: String,
    /// Passed through to the engine uninterpreted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Step parameters; string values may contain `{{ ... }}` references into the run context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with: Option<Payload>,
}

impl WorkflowDefinition {
    /// Whether this workflow listens to the given event identifier
    pub fn listens_to(&self, event_id: &str) -> bool {
        self.on.events.iter().any(|event| event == event_id)
    }

    /// Cron schedule string, if the workflow declares a non-empty one
    pub fn cron_schedule(&self) -> Option<&str> {
        self.on
            .cron
            .as_ref()
            .map(|cron| cron.schedule.trim())
            .filter(|schedule| !schedule.is_empty())
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }
}
