/// Configuration management for the stepline service
///
/// Handles the HTTP server address, the workflow directory, engine client options and
/// optional integration credentials. Values come from environment variables for
/// k8s/container deployment.

use crate::client::{ClientOptions, TlsOptions};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Directory scanned for workflow YAML files
    pub workflows_dir: PathBuf,
    /// Execution engine client options
    pub client: ClientOptions,
    /// Slack credentials; the Slack integration is enabled when present
    pub slack: Option<SlackConfig>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub token: String,
    pub team_id: String,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("token", &"<redacted>")
            .field("team_id", &self.team_id)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3004,
            },
            workflows_dir: PathBuf::from(".stepline"),
            client: ClientOptions::default(),
            slack: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Unset or blank keys fall back to defaults; values that fail to parse are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let server = ServerConfig {
            host: get("STEPLINE_HOST").unwrap_or(defaults.server.host),
            port: parse_or(get("STEPLINE_PORT"), "STEPLINE_PORT", defaults.server.port)?,
        };

        let workflows_dir = get("STEPLINE_WORKFLOWS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.workflows_dir);

        let client_defaults = defaults.client;
        let client = ClientOptions {
            host_port: get("STEPLINE_CLIENT_HOST_PORT").unwrap_or(client_defaults.host_port),
            namespace: get("STEPLINE_CLIENT_NAMESPACE").unwrap_or(client_defaults.namespace),
            default_queue: get("STEPLINE_CLIENT_DEFAULT_QUEUE").unwrap_or(client_defaults.default_queue),
            connect_attempts: parse_or(
                get("STEPLINE_CLIENT_CONNECT_ATTEMPTS"),
                "STEPLINE_CLIENT_CONNECT_ATTEMPTS",
                client_defaults.connect_attempts,
            )?,
            connect_delay: Duration::from_secs(parse_or(
                get("STEPLINE_CLIENT_CONNECT_DELAY_SECS"),
                "STEPLINE_CLIENT_CONNECT_DELAY_SECS",
                client_defaults.connect_delay.as_secs(),
            )?),
            tls: TlsOptions {
                root_ca: get("STEPLINE_CLIENT_TLS_ROOT_CA"),
                root_ca_file: get("STEPLINE_CLIENT_TLS_ROOT_CA_FILE").map(PathBuf::from),
                cert: get("STEPLINE_CLIENT_TLS_CERT"),
                cert_file: get("STEPLINE_CLIENT_TLS_CERT_FILE").map(PathBuf::from),
                key: get("STEPLINE_CLIENT_TLS_KEY"),
                key_file: get("STEPLINE_CLIENT_TLS_KEY_FILE").map(PathBuf::from),
                server_name: get("STEPLINE_CLIENT_TLS_SERVER_NAME"),
            },
        };

        let slack = match (get("SLACK_TOKEN"), get("SLACK_TEAM_ID")) {
            (Some(token), Some(team_id)) => Some(SlackConfig { token, team_id }),
            (None, None) => None,
            _ => {
                return Err(Error::Config(
                    "SLACK_TOKEN and SLACK_TEAM_ID must be set together".to_string(),
                ))
            }
        };

        Ok(Self {
            server,
            workflows_dir,
            client,
            slack,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{} has invalid value '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}
