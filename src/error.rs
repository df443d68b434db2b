//! Error types for mailgate.

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "Invalid config key '{key}': should be a string or an email address without periods in the username"
    )]
    InvalidConfigKey { key: String },

    #[error("No notification senders configured")]
    NoSendersConfigured,

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

/// Why a recipient address was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecipientError {
    #[error("'{address}' is not a valid recipient: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Recipient {key} does not exist in configuration")]
    NotFound { key: String },
}

impl RecipientError {
    pub(crate) fn invalid(address: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}

/// MIME extraction errors. Recovered locally by substituting a placeholder.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("No readable text/plain or text/html part in message")]
    UnresolvableBody,

    #[error("Message could not be parsed as MIME")]
    Malformed,
}

/// Notifier backend errors. Each one fails a single notification only.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Invalid backend configuration: {0}")]
    InvalidBackendConfig(String),

    #[error("Unsupported notification URL: {0}")]
    UnsupportedUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Attachment staging failed: {0}")]
    Attachment(#[from] std::io::Error),
}

/// SMTP session errors. These end the connection.
#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
