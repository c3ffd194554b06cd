//! Secret lookup by name.
//!
//! Secrets are checked in the environment first (`deepgram-api-key` →
//! `DEEPGRAM_API_KEY`), then in a mounted secrets directory.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret '{0}' not found")]
    Missing(String),

    #[error("Secret name must not be empty")]
    EmptyName,

    #[error("Failed to read secret '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Key-value secret lookup
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, SecretError>;
}

/// Environment variable name for a secret name
pub fn env_name(secret_name: &str) -> String {
    secret_name.replace('-', "_").to_uppercase()
}

/// Secrets from environment variables
#[derive(Debug, Default, Clone)]
pub struct EnvSecrets;

#[async_trait]
impl SecretSource for EnvSecrets {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, SecretError> {
        if name.is_empty() {
            return Err(SecretError::EmptyName);
        }
        match std::env::var(env_name(name)) {
            Ok(value) if !value.is_empty() => {
                debug!(secret = name, "Found secret in environment");
                Ok(value.into_bytes())
            }
            _ => Err(SecretError::Missing(name.to_string())),
        }
    }
}

/// Secrets stored as files named after the secret (e.g. `/run/secrets/<name>`)
#[derive(Debug, Clone)]
pub struct DirSecrets {
    dir: PathBuf,
}

impl DirSecrets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SecretSource for DirSecrets {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, SecretError> {
        if name.is_empty() {
            return Err(SecretError::EmptyName);
        }
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(secret = name, path = %path.display(), "Found secret file");
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SecretError::Missing(name.to_string()))
            }
            Err(source) => Err(SecretError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}

/// Consults each source in order; the first hit wins
pub struct ChainedSecrets {
    sources: Vec<Box<dyn SecretSource>>,
}

impl ChainedSecrets {
    pub fn new(sources: Vec<Box<dyn SecretSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl SecretSource for ChainedSecrets {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, SecretError> {
        for source in &self.sources {
            match source.fetch(name).await {
                Err(SecretError::Missing(_)) => continue,
                other => return other,
            }
        }
        Err(SecretError::Missing(name.to_string()))
    }
}
