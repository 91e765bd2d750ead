/// Echo integration
///
/// Logs the `message` field it receives, remembers it, and returns it as output.
/// Useful for smoke-testing workflow files without external services.

use crate::error::{Error, Result};
use crate::integrations::{required_str, Action, Integration};
use crate::workflow::Payload;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct EchoIntegration {
    messages: Mutex<Vec<String>>,
}

impl EchoIntegration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages echoed so far, oldest first
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Integration for EchoIntegration {
    fn id(&self) -> &str {
        "echo"
    }

    fn supported_verbs(&self) -> Vec<String> {
        vec!["echo".to_string()]
    }

    async fn perform(&self, action: &Action, input: Payload) -> Result<Payload> {
        match action.verb.as_str() {
            "echo" => {
                let message = required_str(action, &input, "message")?.to_string();
                tracing::info!("🔊 echo: {}", message);

                if let Ok(mut messages) = self.messages.lock() {
                    messages.push(message.clone());
                }

                let mut output = Payload::new();
                output.insert("message".to_string(), Value::String(message));
                Ok(output)
            }
            other => Err(Error::action_failed(action, format!("unsupported action: {}", other))),
        }
    }
}
