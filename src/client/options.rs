/// Engine client options and TLS material
///
/// Certificates and keys may be given inline (PEM text) or as file paths, never both
/// for the same item. Material is resolved once when the client registry is built.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_HOST_PORT: &str = "127.0.0.1:7233";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_CONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Engine frontend address (e.g., "127.0.0.1:7233")
    pub host_port: String,
    pub namespace: String,
    /// Queue used when a job leaves its queue empty
    pub default_queue: String,
    /// Attempts made when bootstrapping the default queue
    pub connect_attempts: u32,
    /// Pause between bootstrap attempts
    pub connect_delay: Duration,
    #[serde(default)]
    pub tls: TlsOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host_port: DEFAULT_HOST_PORT.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_queue: DEFAULT_QUEUE.to_string(),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_delay: DEFAULT_CONNECT_DELAY,
            tls: TlsOptions::default(),
        }
    }
}

/// Raw TLS settings as configured
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsOptions {
    pub root_ca: Option<String>,
    pub root_ca_file: Option<PathBuf>,
    pub cert: Option<String>,
    pub cert_file: Option<PathBuf>,
    pub key: Option<String>,
    pub key_file: Option<PathBuf>,
    pub server_name: Option<String>,
}

/// Where one piece of TLS material comes from
#[derive(Debug, Clone, PartialEq)]
enum Source {
    Inline(String),
    File(PathBuf),
}

impl Source {
    fn pick(what: &str, inline: &Option<String>, file: &Option<PathBuf>) -> Result<Option<Self>> {
        let inline = inline.as_ref().filter(|value| !value.trim().is_empty());
        let file = file.as_ref().filter(|path| !path.as_os_str().is_empty());

        match (inline, file) {
            (Some(_), Some(_)) => Err(Error::Config(format!(
                "{} is set both inline and as a file; choose one",
                what
            ))),
            (Some(value), None) => Ok(Some(Source::Inline(value.clone()))),
            (None, Some(path)) => Ok(Some(Source::File(path.clone()))),
            (None, None) => Ok(None),
        }
    }

    fn is_file(&self) -> bool {
        matches!(self, Source::File(_))
    }

    fn load(self, what: &str) -> Result<Vec<u8>> {
        match self {
            Source::Inline(value) => Ok(value.into_bytes()),
            Source::File(path) => std::fs::read(&path).map_err(|e| {
                Error::Config(format!("unable to read {} from {}: {}", what, path.display(), e))
            }),
        }
    }
}

/// Resolved mutual-TLS material handed to the connector
#[derive(Clone, PartialEq)]
pub struct TlsMaterial {
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
    pub root_ca: Option<Vec<u8>>,
    pub server_name: Option<String>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("client_cert", &format!("{} bytes", self.client_cert.len()))
            .field("client_key", &"<redacted>")
            .field("root_ca", &self.root_ca.as_ref().map(|ca| format!("{} bytes", ca.len())))
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl TlsOptions {
    /// Validate and load the configured material
    ///
    /// TLS is enabled when both a client certificate and key are configured. Returns
    /// `Ok(None)` when neither is.
    pub fn resolve(&self) -> Result<Option<TlsMaterial>> {
        let cert = Source::pick("client certificate", &self.cert, &self.cert_file)?;
        let key = Source::pick("client key", &self.key, &self.key_file)?;
        let root_ca = Source::pick("root CA", &self.root_ca, &self.root_ca_file)?;

        let (cert, key) = match (cert, key) {
            (None, None) => return Ok(None),
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                return Err(Error::Config(
                    "client certificate and key must be configured together".to_string(),
                ))
            }
        };

        if cert.is_file() != key.is_file() {
            return Err(Error::Config(
                "specify both client certificate and key as files or both inline".to_string(),
            ));
        }

        let server_name = self
            .server_name
            .as_ref()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        Ok(Some(TlsMaterial {
            client_cert: cert.load("client certificate")?,
            client_key: key.load("client key")?,
            root_ca: root_ca.map(|ca| ca.load("root CA")).transpose()?,
            server_name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn inline(cert: &str, key: &str) -> TlsOptions {
        TlsOptions {
            cert: Some(cert.to_string()),
            key: Some(key.to_string()),
            ..TlsOptions::default()
        }
    }

    #[test]
    fn no_material_means_no_tls() {
        assert_eq!(TlsOptions::default().resolve().unwrap(), None);

        let server_name_only = TlsOptions {
            server_name: Some("engine.internal".to_string()),
            ..TlsOptions::default()
        };
        assert_eq!(server_name_only.resolve().unwrap(), None);
    }

    #[test]
    fn inline_pair_resolves() {
        let mut options = inline("CERT", "KEY");
        options.server_name = Some(" engine.internal ".to_string());

        let material = options.resolve().unwrap().unwrap();
        assert_eq!(material.client_cert, b"CERT".to_vec());
        assert_eq!(material.client_key, b"KEY".to_vec());
        assert_eq!(material.root_ca, None);
        assert_eq!(material.server_name.as_deref(), Some("engine.internal"));
    }

    #[test]
    fn file_pair_and_root_ca_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &str| {
            let path = dir.path().join(name);
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(body.as_bytes()).unwrap();
            path
        };

        let options = TlsOptions {
            cert_file: Some(write("client.pem", "CERT FILE")),
            key_file: Some(write("client.key", "KEY FILE")),
            root_ca_file: Some(write("ca.pem", "CA FILE")),
            ..TlsOptions::default()
        };

        let material = options.resolve().unwrap().unwrap();
        assert_eq!(material.client_cert, b"CERT FILE".to_vec());
        assert_eq!(material.root_ca, Some(b"CA FILE".to_vec()));
    }

    #[test]
    fn rejects_inconsistent_material() {
        let both = TlsOptions {
            cert_file: Some(PathBuf::from("/tmp/client.pem")),
            ..inline("CERT", "KEY")
        };
        assert!(matches!(both.resolve(), Err(Error::Config(_))));

        let mixed = TlsOptions {
            cert: Some("CERT".to_string()),
            key_file: Some(PathBuf::from("/tmp/client.key")),
            ..TlsOptions::default()
        };
        assert!(matches!(mixed.resolve(), Err(Error::Config(ref m)) if m.contains("both")));

        let lonely = TlsOptions {
            cert: Some("CERT".to_string()),
            ..TlsOptions::default()
        };
        assert!(matches!(lonely.resolve(), Err(Error::Config(_))));

        let missing = TlsOptions {
            cert_file: Some(PathBuf::from("/definitely/not/here.pem")),
            key_file: Some(PathBuf::from("/definitely/not/here.key")),
            ..TlsOptions::default()
        };
        assert!(matches!(missing.resolve(), Err(Error::Config(_))));
    }
}
