/// Integrations
///
/// An integration is a named set of verbs. Every `(integration id, verb)` pair becomes
/// an action that workflow steps can reference as `integrationId:verb`.

use crate::error::{Error, Result};
use crate::workflow::Payload;
use async_trait::async_trait;
use std::{fmt, str::FromStr};

// Test/no-op integration that echoes its input
pub mod echo;

// Slack Web API integration
pub mod slack;

pub use echo::EchoIntegration;
pub use slack::SlackIntegration;

/// Capability set every integration provides
#[async_trait]
pub trait Integration: Send + Sync {
    /// Integration identifier, the part before `:` in an action id
    fn id(&self) -> &str;

    /// Verbs this integration can perform
    fn supported_verbs(&self) -> Vec<String>;

    /// Perform `action` with the given input and return its outputs
    async fn perform(&self, action: &Action, input: Payload) -> Result<Payload>;
}

/// Parsed action identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Action {
    pub integration_id: String,
    pub verb: String,
}

impl Action {
    pub fn new(integration_id: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            integration_id: integration_id.into(),
            verb: verb.into(),
        }
    }

    /// Parse `integrationId:verb`; both parts must be non-empty and the separator
    /// must appear exactly once.
    pub fn parse(action_id: &str) -> Result<Self> {
        match action_id.split_once(':') {
            Some((integration_id, verb))
                if !integration_id.is_empty() && !verb.is_empty() && !verb.contains(':') =>
            {
                Ok(Self::new(integration_id, verb))
            }
            _ => Err(Error::MalformedActionId(action_id.to_string())),
        }
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.integration_id, self.verb)
    }
}

/// Fetch a required string field from an action input
pub(crate) fn required_str<'a>(action: &Action, input: &'a Payload, field: &str) -> Result<&'a str> {
    match input.get(field) {
        None | Some(serde_json::Value::Null) => Err(Error::action_failed(
            action,
            format!("missing required field: {}", field),
        )),
        Some(value) => value.as_str().ok_or_else(|| {
            Error::action_failed(action, format!("invalid type for field: {}", field))
        }),
    }
}
