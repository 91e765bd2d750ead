/// Action registry
///
/// Maps `integrationId:verb` keys to handlers. Built once per worker from the
/// registered integrations and shared read-only afterwards.

use crate::error::{Error, Result};
use crate::integrations::{Action, Integration};
use crate::runtime::engine::ActivityHandler;
use crate::workflow::Payload;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};

/// Handler bound to one action of one integration
#[derive(Clone)]
pub struct ActionHandler {
    action: Action,
    integration: Arc<dyn Integration>,
}

impl ActionHandler {
    pub fn action(&self) -> &Action {
        &self.action
    }

    pub async fn call(&self, input: Payload) -> Result<Payload> {
        self.integration.perform(&self.action, input).await
    }
}

impl std::fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHandler")
            .field("action", &self.action)
            .finish()
    }
}

#[async_trait]
impl ActivityHandler for ActionHandler {
    async fn handle(&self, input: Payload) -> Result<Payload> {
        self.call(input).await
    }
}

#[derive(Debug, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, ActionHandler>,
}

impl ActionRegistry {
    /// Register every verb of every integration
    ///
    /// Integrations sharing an id are not merged: a later integration replaces the
    /// earlier one's handler for every verb they both declare.
    pub fn from_integrations(integrations: &[Arc<dyn Integration>]) -> Self {
        let mut registry = Self::default();
        for integration in integrations {
            registry.register(Arc::clone(integration));
        }
        registry
    }

    pub fn register(&mut self, integration: Arc<dyn Integration>) {
        for verb in integration.supported_verbs() {
            let action = Action::new(integration.id(), verb);
            let key = action.to_string();
            tracing::debug!("🔌 Registering action {}", key);

            let handler = ActionHandler {
                action,
                integration: Arc::clone(&integration),
            };
            if self.handlers.insert(key.clone(), handler).is_some() {
                tracing::warn!("⚠️ Action {} was already registered, replacing handler", key);
            }
        }
    }

    /// Tagged lookup: `Some(handler)` when registered
    pub fn lookup(&self, action: &Action) -> Option<&ActionHandler> {
        self.handlers.get(&action.to_string())
    }

    /// Parse an action id and return its handler
    pub fn resolve(&self, action_id: &str) -> Result<&ActionHandler> {
        let action = Action::parse(action_id)?;
        self.lookup(&action)
            .ok_or_else(|| Error::ActionNotRegistered(action.to_string()))
    }

    /// Registered action keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    struct Fixed {
        id: &'static str,
        verbs: &'static [&'static str],
        tag: &'static str,
    }

    #[async_trait]
    impl Integration for Fixed {
        fn id(&self) -> &str {
            self.id
        }

        fn supported_verbs(&self) -> Vec<String> {
            self.verbs.iter().map(|v| v.to_string()).collect()
        }

        async fn perform(&self, action: &Action, _input: Payload) -> Result<Payload> {
            let mut out = Payload::new();
            out.insert("tag".to_string(), Value::String(self.tag.to_string()));
            out.insert("verb".to_string(), Value::String(action.verb.clone()));
            Ok(out)
        }
    }

    fn integration(id: &'static str, verbs: &'static [&'static str], tag: &'static str) -> Arc<dyn Integration> {
        Arc::new(Fixed { id, verbs, tag })
    }

    #[tokio::test]
    async fn registers_every_verb() {
        let registry = ActionRegistry::from_integrations(&[
            integration("slack", &["send-message", "create-channel"], "slack"),
            integration("echo", &["echo"], "echo"),
        ]);

        assert_eq!(
            registry.keys(),
            vec!["echo:echo", "slack:create-channel", "slack:send-message"]
        );

        let handler = registry.resolve("slack:create-channel").unwrap();
        let out = handler.call(Payload::new()).await.unwrap();
        assert_eq!(out["verb"], json!("create-channel"));
    }

    #[tokio::test]
    async fn later_integration_shadows_overlapping_verbs() {
        let registry = ActionRegistry::from_integrations(&[
            integration("chat", &["send", "archive"], "first"),
            integration("chat", &["send"], "second"),
        ]);

        let send = registry.resolve("chat:send").unwrap().call(Payload::new()).await.unwrap();
        let archive = registry.resolve("chat:archive").unwrap().call(Payload::new()).await.unwrap();
        assert_eq!(send["tag"], json!("second"));
        assert_eq!(archive["tag"], json!("first"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn lookup_and_resolve_failures() {
        let registry = ActionRegistry::from_integrations(&[integration("echo", &["echo"], "echo")]);

        assert!(registry.lookup(&Action::new("echo", "shout")).is_none());
        assert!(matches!(
            registry.resolve("echo:shout"),
            Err(Error::ActionNotRegistered(ref key)) if key == "echo:shout"
        ));
        assert!(matches!(registry.resolve("echo"), Err(Error::MalformedActionId(_))));
    }
}
