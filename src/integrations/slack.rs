/// Slack integration
///
/// Talks to the Slack Web API with a bot token. Supported verbs:
/// - `create-channel`: `{ channelName }` -> `{ channelId }` (private channel)
/// - `add-users-to-channel`: `{ channelId, userIds: [..] }` -> `{}`
/// - `send-message`: `{ channelId, message }` -> `{}`

use crate::error::{Error, Result};
use crate::integrations::{required_str, Action, Integration};
use crate::workflow::Payload;
use async_trait::async_trait;
use serde_json::{json, Value};

const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Clone)]
pub struct SlackIntegration {
    client: reqwest::Client,
    token: String,
    team_id: String,
    base_url: String,
}

impl SlackIntegration {
    pub fn new(token: impl Into<String>, team_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            team_id: team_id.into(),
            base_url: SLACK_API_BASE.to_string(),
        }
    }

    /// Point the integration at a different API root (e.g., a local mock)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn create_channel(&self, action: &Action, input: &Payload) -> Result<Payload> {
        let name = required_str(action, input, "channelName")?;

        let response = self
            .call(
                action,
                "conversations.create",
                json!({ "name": name, "is_private": true, "team_id": self.team_id }),
            )
            .await?;

        let channel_id = response
            .pointer("/channel/id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::action_failed(action, "response did not contain a channel id"))?;

        let mut output = Payload::new();
        output.insert("channelId".to_string(), Value::String(channel_id.to_string()));
        Ok(output)
    }

    async fn add_users_to_channel(&self, action: &Action, input: &Payload) -> Result<Payload> {
        let channel_id = required_str(action, input, "channelId")?;
        let user_ids = user_ids(action, input)?;

        self.call(
            action,
            "conversations.invite",
            json!({ "channel": channel_id, "users": user_ids.join(",") }),
        )
        .await?;

        Ok(Payload::new())
    }

    async fn send_message(&self, action: &Action, input: &Payload) -> Result<Payload> {
        let channel_id = required_str(action, input, "channelId")?;
        let message = required_str(action, input, "message")?;

        self.call(
            action,
            "chat.postMessage",
            json!({ "channel": channel_id, "text": message }),
        )
        .await?;

        Ok(Payload::new())
    }

    /// POST a Web API method and return the body once Slack reports `ok: true`
    async fn call(&self, action: &Action, method: &str, body: Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, method);
        tracing::debug!("🌐 Slack API call: {}", method);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::action_failed(action, format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::action_failed(action, format!("{} returned invalid JSON: {}", method, e)))?;

        if !status.is_success() || payload.get("ok").and_then(Value::as_bool) != Some(true) {
            let reason = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            return Err(Error::action_failed(
                action,
                format!("{} failed (status {}): {}", method, status, reason),
            ));
        }

        Ok(payload)
    }
}

fn user_ids(action: &Action, input: &Payload) -> Result<Vec<String>> {
    let invalid = || Error::action_failed(action, "invalid type for field: userIds");

    match input.get("userIds") {
        None | Some(Value::Null) => Err(Error::action_failed(action, "missing required field: userIds")),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        Some(_) => Err(invalid()),
    }
}

#[async_trait]
impl Integration for SlackIntegration {
    fn id(&self) -> &str {
        "slack"
    }

    fn supported_verbs(&self) -> Vec<String> {
        ["create-channel", "send-message", "add-users-to-channel"]
            .iter()
            .map(|verb| verb.to_string())
            .collect()
    }

    async fn perform(&self, action: &Action, input: Payload) -> Result<Payload> {
        tracing::info!("💬 Slack action: {}", action);
        match action.verb.as_str() {
            "create-channel" => self.create_channel(action, &input).await,
            "add-users-to-channel" => self.add_users_to_channel(action, &input).await,
            "send-message" => self.send_message(action, &input).await,
            other => Err(Error::action_failed(action, format!("unsupported action: {}", other))),
        }
    }
}
