//! Configuration: process settings from the environment, gateway settings
//! from a YAML file.
//!
//! The file is fully validated at load time. Anything wrong with it is a
//! startup error; nothing is re-read afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::info;

use crate::address::decode_config_key;
use crate::error::ConfigError;
use crate::mail::BodyFormat;
use crate::routing::{BackendConfig, SenderConfig, SenderRegistry};
use crate::smtp::BasicAuthenticator;

pub const DEFAULT_CONFIG_PATH: &str = "mailgate.yaml";
pub const DEFAULT_PORT: u16 = 8025;
pub const DEFAULT_HOSTNAME: &str = "mailgate";
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 25 * 1024 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-sender options live under this key and are stripped from the
/// backend config.
const GATEWAY_OPTIONS_KEY: &str = "mailgate";

/// Process-level settings.
#[derive(Debug, Clone)]
pub struct ServerEnv {
    /// Path of the YAML configuration file.
    pub config_path: PathBuf,
    /// When set, logs are also written to a daily rolling file here.
    pub log_dir: Option<PathBuf>,
}

impl ServerEnv {
    /// Build settings from `MAILGATE_CONFIG` and `MAILGATE_LOG_DIR`.
    pub fn from_env() -> Self {
        let config_path = std::env::var("MAILGATE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let log_dir = std::env::var("MAILGATE_LOG_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        Self {
            config_path,
            log_dir,
        }
    }
}

// ── File schema ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SmtpSection {
    hostname: Option<String>,
    max_message_size: Option<usize>,
    auth: Option<AuthSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuthSection {
    /// login → password
    basic: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DispatchSection {
    attachment_dir: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    listen: ListenConfig,
    smtp: SmtpSection,
    dispatch: DispatchSection,
    configs: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SenderOptions {
    title_template: Option<String>,
    body_template: Option<String>,
    body_format: Option<String>,
    body_pattern: Option<String>,
}

// ── Loaded configuration ────────────────────────────────────────────

/// Everything the gateway needs to start.
#[derive(Debug)]
pub struct GatewayConfig {
    pub listen: ListenConfig,
    /// Name advertised to SMTP clients.
    pub hostname: String,
    pub max_message_size: usize,
    pub attachment_dir: Option<PathBuf>,
    pub request_timeout: Duration,
    /// Present only when `smtp.auth.basic` lists at least one login.
    pub authenticator: Option<BasicAuthenticator>,
    pub registry: SenderRegistry,
}

/// Read and validate a configuration file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Validate configuration from YAML text.
pub fn parse_config(yaml: &str) -> Result<GatewayConfig, ConfigError> {
    let root: Value = serde_yaml::from_str(yaml)?;
    if !root.is_mapping() {
        return Err(ConfigError::ParseError("root node not a mapping".into()));
    }
    let raw: RawConfig = serde_yaml::from_value(root)?;

    let configs = match raw.configs {
        Some(Value::Mapping(configs)) => configs,
        _ => return Err(ConfigError::ParseError("'configs' node not a mapping".into())),
    };
    let senders = configs
        .into_iter()
        .map(|(key, node)| {
            let key = match key {
                Value::String(key) => key,
                other => {
                    return Err(ConfigError::InvalidConfigKey {
                        key: format!("{other:?}"),
                    });
                }
            };
            let sender = load_sender(&key, node)?;
            Ok((decode_config_key(&key)?, sender))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;
    let registry = SenderRegistry::new(senders)?;
    info!("Loaded configuration with {} recipient(s)", registry.len());

    let authenticator = raw
        .smtp
        .auth
        .map(|auth| BasicAuthenticator::new(auth.basic))
        .filter(|auth| !auth.is_empty());

    Ok(GatewayConfig {
        listen: raw.listen,
        hostname: raw.smtp.hostname.unwrap_or_else(|| DEFAULT_HOSTNAME.to_string()),
        max_message_size: raw.smtp.max_message_size.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE),
        attachment_dir: raw.dispatch.attachment_dir,
        request_timeout: raw
            .dispatch
            .request_timeout_secs
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs),
        authenticator,
        registry,
    })
}

fn load_sender(key: &str, node: Value) -> Result<SenderConfig, ConfigError> {
    let Value::Mapping(mut node) = node else {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "sender node not a mapping".into(),
        });
    };

    let options: SenderOptions = match node.remove(GATEWAY_OPTIONS_KEY) {
        Some(value) => serde_yaml::from_value(value).map_err(|e| ConfigError::InvalidValue {
            key: format!("{key}.{GATEWAY_OPTIONS_KEY}"),
            message: e.to_string(),
        })?,
        None => SenderOptions::default(),
    };
    let backend = backend_config(key, node)?;

    let mut sender = SenderConfig::new(backend);
    if let Some(template) = options.title_template {
        sender = sender.with_title_template(template);
    }
    if let Some(template) = options.body_template {
        sender = sender.with_body_template(template);
    }
    if let Some(token) = options.body_format {
        let format = BodyFormat::from_token(&token).ok_or_else(|| ConfigError::InvalidValue {
            key: format!("{key}.body_format"),
            message: format!("invalid notification format: {token}"),
        })?;
        sender = sender.with_body_format(format);
    }
    if let Some(pattern) = options.body_pattern {
        sender = sender.with_body_pattern(&pattern)?;
    }
    Ok(sender)
}

/// The remaining sender mapping, handed to the notifier untouched.
fn backend_config(key: &str, node: Mapping) -> Result<BackendConfig, ConfigError> {
    serde_json::to_value(Value::Mapping(node))
        .map(BackendConfig::new)
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}
