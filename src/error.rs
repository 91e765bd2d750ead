/// Error taxonomy for the orchestration layer
///
/// Every fallible operation in the crate returns [`Error`]. Trigger and schedule
/// dispatch collect per-job failures into a single [`DispatchError`] so callers can
/// inspect all of them, not just the first.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing client/server configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine could not be reached within the retry budget.
    #[error("could not connect to engine for queue '{queue}' after {attempts} attempt(s): {reason}")]
    ConnectionFailed {
        queue: String,
        attempts: u32,
        reason: String,
    },

    #[error("malformed action id '{0}': expected '<integrationId>:<verb>'")]
    MalformedActionId(String),

    #[error("action '{0}' is not registered")]
    ActionNotRegistered(String),

    /// A job references an action no integration provides.
    #[error("job '{job}' step '{step}' uses action '{action}' which is not registered")]
    UnregisteredActivity {
        job: String,
        step: String,
        action: String,
    },

    /// Every job presented to the worker was rejected.
    #[error("no jobs could be registered ({} rejected)", .failures.len())]
    NoJobsRegistered { failures: Vec<Error> },

    /// A step failed and aborted its run. `completed_steps` lists the steps that
    /// finished before it.
    #[error("step '{step}' of job '{job}' failed: {source}")]
    StepExecutionFailed {
        job: String,
        step: String,
        completed_steps: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    /// An integration rejected or failed an action.
    #[error("action '{action}' failed: {message}")]
    ActionFailed { action: String, message: String },

    #[error("template reference '{expression}' could not be resolved")]
    TemplateResolution { expression: String },

    #[error("run input must be a JSON object, got {0}")]
    InvalidInput(String),

    #[error("activity '{activity}' timed out after {timeout:?}")]
    ActivityTimeout { activity: String, timeout: Duration },

    #[error("schedule '{0}' not found")]
    ScheduleNotFound(String),

    /// Failure reported by the execution engine itself.
    #[error("engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("failed to parse workflow file {path}: {source}")]
    WorkflowParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn action_failed(action: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::ActionFailed {
            action: action.to_string(),
            message: message.into(),
        }
    }
}

/// One job that could not be started or scheduled.
#[derive(Debug)]
pub struct JobFailure {
    pub workflow: String,
    pub job: String,
    pub error: Error,
}

/// Aggregate of every job-level failure seen while handling one trigger or one
/// schedule initialization pass.
#[derive(Debug, Default)]
pub struct DispatchError {
    /// Jobs that were started (or scheduled) successfully in the same pass.
    pub succeeded: Vec<String>,
    pub failures: Vec<JobFailure>,
}

impl DispatchError {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_jobs(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.job.as_str()).collect()
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} job(s) failed to dispatch", self.failures.len())?;
        if !self.succeeded.is_empty() {
            write!(f, " ({} succeeded: {})", self.succeeded.len(), self.succeeded.join(", "))?;
        }
        for failure in &self.failures {
            write!(
                f,
                "; job '{}' (workflow '{}'): {}",
                failure.job, failure.workflow, failure.error
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for DispatchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_error_names_every_failed_job() {
        let err = DispatchError {
            succeeded: vec!["notify".to_string()],
            failures: vec![
                JobFailure {
                    workflow: "onboarding".to_string(),
                    job: "create-channel".to_string(),
                    error: Error::Engine("queue offline".to_string()),
                },
                JobFailure {
                    workflow: "onboarding".to_string(),
                    job: "invite".to_string(),
                    error: Error::ActionNotRegistered("slack:invite".to_string()),
                },
            ],
        };

        let rendered = err.to_string();
        assert!(rendered.starts_with("2 job(s) failed to dispatch"));
        assert!(rendered.contains("1 succeeded: notify"));
        assert!(rendered.contains("job 'create-channel'"));
        assert!(rendered.contains("job 'invite'"));
        assert_eq!(err.failed_jobs(), vec!["create-channel", "invite"]);
    }
}
