//! Configuration for mailscribe.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (after loading `ENV_FILE` or `.env`)
//! 2. Config file (`mailscribe.yaml`, or the path in `MAILSCRIBE_CONFIG`)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for mailscribe.yaml
//! - Paths in config file are relative to the config file's directory
//!
//! The resolved configuration is built once at startup and passed down
//! explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::adapters::DeepgramConfig;
use crate::core::{ProcessingLimits, ServiceSettings};

pub const CONFIG_FILE_NAME: &str = "mailscribe.yaml";

const DEFAULT_MAILBOX_TIMEOUT_SECONDS: u64 = 30;

/// Configuration errors (fatal at startup)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting {env} (or `{key}` in mailscribe.yaml)")]
    Missing { env: &'static str, key: &'static str },

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Failed to load env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to determine home directory")]
    NoHome,
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub mailbox: MailboxSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub transcription: TranscriptionSection,
    #[serde(default)]
    pub secrets: SecretsSection,
    #[serde(default)]
    pub limits: Option<ProcessingLimits>,
    pub dedup_capacity: Option<usize>,
    pub reseed_on_expired: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailboxSection {
    /// Mailbox address; also the checkpoint key
    pub address: Option<String>,
    /// API user id
    pub user: Option<String>,
    pub allowed_sender: Option<String>,
    /// Where transcripts are sent
    pub reply_to: Option<String>,
    /// Per-call timeout for mailbox API requests
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsSection {
    pub home: Option<String>,
    pub download_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_body_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionSection {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsSection {
    pub dir: Option<String>,
    pub transcription_key: Option<String>,
    pub gmail_credentials: Option<String>,
    pub gmail_token: Option<String>,
}

/// Names of the secrets fetched at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretNames {
    pub transcription_key: String,
    pub gmail_credentials: String,
    pub gmail_token: String,
}

impl Default for SecretNames {
    fn default() -> Self {
        Self {
            transcription_key: "deepgram-api-key".to_string(),
            gmail_credentials: "gmail-credentials-json".to_string(),
            gmail_token: "gmail-token-json".to_string(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub mailbox_address: String,
    pub mailbox_user: String,
    pub allowed_sender: String,
    pub reply_to: String,
    pub mailbox_timeout_seconds: u64,
    /// Engine state (checkpoints, journal)
    pub home: PathBuf,
    pub download_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    /// Reported by `/debug` and logged at startup
    pub build_version: String,
    pub transcription_endpoint: String,
    pub transcription_model: String,
    pub transcription_language: String,
    pub audio_content_type: String,
    pub limits: ProcessingLimits,
    pub dedup_capacity: usize,
    pub reseed_on_expired: bool,
    pub secrets_dir: Option<PathBuf>,
    pub secret_names: SecretNames,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.home.join("checkpoints")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.home.join("journal.jsonl")
    }

    pub fn mailbox_timeout(&self) -> Duration {
        Duration::from_secs(self.mailbox_timeout_seconds)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn deepgram(&self) -> DeepgramConfig {
        DeepgramConfig {
            endpoint: self.transcription_endpoint.clone(),
            model: self.transcription_model.clone(),
            language: self.transcription_language.clone(),
            smart_format: true,
            // Leave headroom so the per-message timeout fires first
            request_timeout: self.limits.transcription_timeout() + Duration::from_secs(5),
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            allowed_sender: self.allowed_sender.clone(),
            recipient: self.reply_to.clone(),
            download_dir: self.download_dir.clone(),
            audio_content_type: self.audio_content_type.clone(),
            dedup_capacity: self.dedup_capacity,
            limits: self.limits.clone(),
            reseed_on_expired: self.reseed_on_expired,
        }
    }
}

/// Load the env file: `ENV_FILE` must exist if set; `.env` is optional
pub fn load_env_file() -> Result<Option<PathBuf>, ConfigError> {
    match std::env::var("ENV_FILE") {
        Ok(path) if !path.is_empty() => {
            let path = PathBuf::from(path);
            dotenvy::from_path(&path).map_err(|source| ConfigError::EnvFile {
                path: path.clone(),
                source,
            })?;
            Ok(Some(path))
        }
        _ => Ok(dotenvy::dotenv().ok()),
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("MAILSCRIBE_CONFIG") {
        return Some(PathBuf::from(path));
    }

    let mut current = std::env::current_dir().ok()?;
    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Some(config_path);
        }
        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Load configuration from the process environment and config file
pub fn load() -> Result<ResolvedConfig, ConfigError> {
    load_env_file()?;

    let config_file = find_config_file();
    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };
    let default_home = dirs::home_dir()
        .ok_or(ConfigError::NoHome)?
        .join(".mailscribe");

    resolve(
        file,
        config_file,
        default_home,
        |key| std::env::var(key).ok().filter(|v| !v.is_empty()),
    )
}

/// Merge file values and environment lookups over defaults
pub fn resolve(
    file: ConfigFile,
    config_file: Option<PathBuf>,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig, ConfigError> {
    let base = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let pick = |env_key: &str, file_value: Option<String>| env(env_key).or(file_value);
    let require = |env_key: &'static str, key: &'static str, file_value: Option<String>| {
        pick(env_key, file_value).ok_or(ConfigError::Missing { env: env_key, key })
    };

    let mailbox_address = require("MAILBOX_ADDRESS", "mailbox.address", file.mailbox.address)?;
    let allowed_sender = require("ALLOWED_SENDER", "mailbox.allowed_sender", file.mailbox.allowed_sender)?;
    let reply_to = require("EMAIL_RESPONSE_ADDRESS", "mailbox.reply_to", file.mailbox.reply_to)?;
    let mailbox_user = pick("GMAIL_USER", file.mailbox.user).unwrap_or_else(|| "me".to_string());

    let home = match env("MAILSCRIBE_HOME") {
        Some(home) => PathBuf::from(home),
        None => file
            .paths
            .home
            .as_deref()
            .map(|p| resolve_path(&base, p))
            .unwrap_or(default_home),
    };
    let download_dir = match env("DOWNLOAD_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => file
            .paths
            .download_dir
            .as_deref()
            .map(|p| resolve_path(&base, p))
            .unwrap_or_else(std::env::temp_dir),
    };
    let secrets_dir = match env("SECRETS_DIR") {
        Some(dir) => Some(PathBuf::from(dir)),
        None => file.secrets.dir.as_deref().map(|p| resolve_path(&base, p)),
    };

    let port = match env("PORT") {
        Some(raw) => parse(raw, "PORT")?,
        None => file.server.port.unwrap_or(8080),
    };
    let mailbox_timeout_seconds = match env("MAILBOX_TIMEOUT_SECONDS") {
        Some(raw) => parse(raw, "MAILBOX_TIMEOUT_SECONDS")?,
        None => file
            .mailbox
            .timeout_seconds
            .unwrap_or(DEFAULT_MAILBOX_TIMEOUT_SECONDS),
    };
    if mailbox_timeout_seconds == 0 {
        return Err(ConfigError::Invalid {
            key: "MAILBOX_TIMEOUT_SECONDS",
            value: "0".to_string(),
        });
    }
    let max_body_bytes = match env("MAX_BODY_BYTES") {
        Some(raw) => parse(raw, "MAX_BODY_BYTES")?,
        None => file.server.max_body_bytes.unwrap_or(1024 * 1024),
    };
    let dedup_capacity = match env("DEDUP_CAPACITY") {
        Some(raw) => parse(raw, "DEDUP_CAPACITY")?,
        None => file
            .dedup_capacity
            .unwrap_or(crate::core::dedup::DEFAULT_CAPACITY),
    };
    let reseed_on_expired = match env("RESEED_ON_EXPIRED") {
        Some(raw) => parse_bool(raw, "RESEED_ON_EXPIRED")?,
        None => file.reseed_on_expired.unwrap_or(true),
    };

    let mut limits = file.limits.unwrap_or_default();
    if let Some(raw) = env("TRANSCRIPTION_TIMEOUT_SECONDS") {
        limits.transcription_timeout_seconds = parse(raw, "TRANSCRIPTION_TIMEOUT_SECONDS")?;
    }
    if let Some(raw) = env("MAX_ATTACHMENT_BYTES") {
        limits.max_attachment_bytes = parse(raw, "MAX_ATTACHMENT_BYTES")?;
    }

    let defaults = SecretNames::default();
    let secret_names = SecretNames {
        transcription_key: file.secrets.transcription_key.unwrap_or(defaults.transcription_key),
        gmail_credentials: file.secrets.gmail_credentials.unwrap_or(defaults.gmail_credentials),
        gmail_token: file.secrets.gmail_token.unwrap_or(defaults.gmail_token),
    };

    Ok(ResolvedConfig {
        mailbox_address,
        mailbox_user,
        allowed_sender,
        reply_to,
        mailbox_timeout_seconds,
        home,
        download_dir,
        host: pick("HOST", file.server.host).unwrap_or_else(|| "0.0.0.0".to_string()),
        port,
        max_body_bytes,
        build_version: env("BUILD_VERSION")
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
        transcription_endpoint: pick("TRANSCRIPTION_ENDPOINT", file.transcription.endpoint)
            .unwrap_or_else(|| crate::adapters::deepgram::DEFAULT_ENDPOINT.to_string()),
        transcription_model: pick("TRANSCRIPTION_MODEL", file.transcription.model)
            .unwrap_or_else(|| "nova-2".to_string()),
        transcription_language: pick("TRANSCRIPTION_LANGUAGE", file.transcription.language)
            .unwrap_or_else(|| "en-US".to_string()),
        audio_content_type: pick("AUDIO_CONTENT_TYPE", file.transcription.content_type)
            .unwrap_or_else(|| "audio/wav".to_string()),
        limits,
        dedup_capacity,
        reseed_on_expired,
        secrets_dir,
        secret_names,
        config_file,
    })
}

fn parse<T: std::str::FromStr>(raw: String, key: &'static str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value: raw })
}

fn parse_bool(raw: String, key: &'static str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}
