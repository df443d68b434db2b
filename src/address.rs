//! Recipient address codec.
//!
//! Routing information is carried in the local-part of the envelope
//! recipient: `user.severity@domain`. Decoding yields the routing key used
//! to look up a sender plus the notification severity. Config keys use the
//! same grammar minus the severity suffix, which is why periods are not
//! allowed in their user part.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RecipientError};

/// Domain assumed for config keys written without an `@`.
pub const DEFAULT_DOMAIN: &str = "mailrise.xyz";

/// Splits `local@domain`, where the local-part may be a quoted string.
static ADDRESS_PARTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:"([^"@]*)"|([^@]*))@([^@]*)$"#).expect("address regex is valid")
});

static SEVERITY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.*)\.(info|success|warning|failure)$").expect("severity regex is valid")
});

// ── Severity ────────────────────────────────────────────────────────

/// Notification class encoded as a dotted suffix on the local-part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Success,
    Warning,
    Failure,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Failure => "failure",
        }
    }

    /// Parse a severity token, ignoring case.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "success" => Some(Self::Success),
            "warning" => Some(Self::Warning),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Routing key ─────────────────────────────────────────────────────

/// A `(user, domain)` pair that selects a sender configuration.
///
/// The user part is case-sensitive; the domain is always stored lower-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    user: String,
    domain: String,
}

impl RoutingKey {
    pub fn new(user: impl Into<String>, domain: &str) -> Self {
        Self {
            user: user.into(),
            domain: domain.to_lowercase(),
        }
    }

    /// A key for a bare config name, placed under [`DEFAULT_DOMAIN`].
    pub fn with_default_domain(user: impl Into<String>) -> Self {
        Self::new(user, DEFAULT_DOMAIN)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The key as it would appear in the config file: the domain is
    /// dropped when it is the default one.
    pub fn as_configured(&self) -> String {
        if self.domain == DEFAULT_DOMAIN {
            self.user.clone()
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.domain)
    }
}

/// Routing information decoded from one recipient address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub key: RoutingKey,
    pub severity: Severity,
}

// ── Decoding ────────────────────────────────────────────────────────

/// Decode an envelope recipient into a routing key and severity.
///
/// Accepts `user@domain`, `"quoted"@domain` and `Name <user@domain>`.
pub fn decode(address: &str) -> Result<Recipient, RecipientError> {
    let mailbox = extract_mailbox(address);
    let (user, domain) = split_address(mailbox)
        .ok_or_else(|| RecipientError::invalid(address, "missing '@'"))?;
    if domain.is_empty() {
        return Err(RecipientError::invalid(address, "empty domain"));
    }

    let (user, severity) = match SEVERITY_SUFFIX.captures(user) {
        Some(caps) => {
            let stripped = caps.get(1).map_or("", |m| m.as_str());
            let severity = caps
                .get(2)
                .and_then(|m| Severity::from_token(m.as_str()))
                .unwrap_or_default();
            (stripped, severity)
        }
        None => (user, Severity::Info),
    };
    if user.is_empty() {
        return Err(RecipientError::invalid(address, "empty local-part"));
    }

    Ok(Recipient {
        key: RoutingKey::new(user, domain),
        severity,
    })
}

/// Parse a key from the `configs` section of the configuration file.
pub fn decode_config_key(key: &str) -> Result<RoutingKey, ConfigError> {
    let invalid = || ConfigError::InvalidConfigKey {
        key: key.to_string(),
    };

    if key.contains('@') {
        let (user, domain) = split_address(key).ok_or_else(invalid)?;
        if user.is_empty() || domain.is_empty() || user.contains('.') {
            return Err(invalid());
        }
        return Ok(RoutingKey::new(user, domain));
    }
    if key.is_empty() || key.contains('.') {
        return Err(invalid());
    }
    Ok(RoutingKey::with_default_domain(key))
}

/// Pull the addr-spec out of a `Display Name <addr>` form.
fn extract_mailbox(address: &str) -> &str {
    let trimmed = address.trim();
    if let Some(inner) = trimmed.strip_suffix('>')
        && let Some(start) = inner.rfind('<')
    {
        return inner[start + 1..].trim();
    }
    trimmed
}

/// Split an addr-spec into user and domain. Surrounding quotes on the
/// local-part are removed.
fn split_address(email: &str) -> Option<(&str, &str)> {
    let caps = ADDRESS_PARTS.captures(email)?;
    let user = caps.get(1).or_else(|| caps.get(2))?.as_str();
    let domain = caps.get(3)?.as_str();
    Some((user, domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user: &str) -> RoutingKey {
        RoutingKey::with_default_domain(user)
    }

    // ── decode ──────────────────────────────────────────────────────

    #[test]
    fn decode_plain_address_defaults_to_info() {
        let rcpt = decode("test@mailrise.xyz").unwrap();
        assert_eq!(rcpt.key, key("test"));
        assert_eq!(rcpt.severity, Severity::Info);
    }

    #[test]
    fn decode_every_severity_suffix() {
        for (suffix, severity) in [
            ("info", Severity::Info),
            ("success", Severity::Success),
            ("warning", Severity::Warning),
            ("failure", Severity::Failure),
        ] {
            let rcpt = decode(&format!("alerts.{suffix}@Example.COM")).unwrap();
            assert_eq!(rcpt.key, RoutingKey::new("alerts", "example.com"));
            assert_eq!(rcpt.severity, severity);
        }
    }

    #[test]
    fn decode_suffix_is_case_insensitive() {
        let rcpt = decode("test.WARNING@mailrise.xyz").unwrap();
        assert_eq!(rcpt.key, key("test"));
        assert_eq!(rcpt.severity, Severity::Warning);
    }

    #[test]
    fn decode_user_is_case_sensitive() {
        let rcpt = decode("TeSt@MAILRISE.xyz").unwrap();
        assert_eq!(rcpt.key.user(), "TeSt");
        assert_eq!(rcpt.key.domain(), "mailrise.xyz");
    }

    #[test]
    fn decode_quoted_local_part() {
        let rcpt = decode("\"with_quotes\"@mailrise.xyz").unwrap();
        assert_eq!(rcpt.key, key("with_quotes"));
        assert_eq!(rcpt.severity, Severity::Info);

        let rcpt = decode("\"with_quotes.success\"@mailrise.xyz").unwrap();
        assert_eq!(rcpt.key, key("with_quotes"));
        assert_eq!(rcpt.severity, Severity::Success);
    }

    #[test]
    fn decode_suffix_after_closing_quote_keeps_quotes() {
        let rcpt = decode("\"weird_quotes\".success@mailrise.xyz").unwrap();
        assert_eq!(rcpt.key, key("\"weird_quotes\""));
        assert_eq!(rcpt.severity, Severity::Success);
    }

    #[test]
    fn decode_display_name_form() {
        let rcpt = decode("John Doe <johndoe.warning@mailrise.xyz>").unwrap();
        assert_eq!(rcpt.key, key("johndoe"));
        assert_eq!(rcpt.severity, Severity::Warning);
    }

    #[test]
    fn decode_unknown_suffix_stays_in_user() {
        let rcpt = decode("build.debug@ci.example.com").unwrap();
        assert_eq!(rcpt.key.user(), "build.debug");
        assert_eq!(rcpt.severity, Severity::Info);
    }

    #[test]
    fn decode_rejects_missing_at() {
        assert!(matches!(
            decode("no-at-sign"),
            Err(RecipientError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn decode_rejects_empty_domain() {
        assert!(matches!(
            decode("Invalid Email <bad@>"),
            Err(RecipientError::InvalidAddress { .. })
        ));
        assert!(decode("user@").is_err());
    }

    #[test]
    fn decode_rejects_empty_user_after_suffix() {
        assert!(decode(".warning@mailrise.xyz").is_err());
        assert!(decode("@mailrise.xyz").is_err());
    }

    // ── config keys ─────────────────────────────────────────────────

    #[test]
    fn config_key_bare_name_uses_default_domain() {
        let k = decode_config_key("test").unwrap();
        assert_eq!(k, key("test"));
        assert_eq!(k.as_configured(), "test");
    }

    #[test]
    fn config_key_full_address() {
        let k = decode_config_key("user@Example.com").unwrap();
        assert_eq!(k, RoutingKey::new("user", "example.com"));
        assert_eq!(k.as_configured(), "user@example.com");
        assert_eq!(k.to_string(), "user@example.com");
    }

    #[test]
    fn config_key_allows_glob_patterns() {
        let k = decode_config_key("the*@*").unwrap();
        assert_eq!(k.user(), "the*");
        assert_eq!(k.domain(), "*");
    }

    #[test]
    fn config_key_rejects_periods() {
        assert!(matches!(
            decode_config_key("has.periods"),
            Err(ConfigError::InvalidConfigKey { .. })
        ));
        assert!(decode_config_key("has.periods@example.com").is_err());
    }

    #[test]
    fn config_key_rejects_malformed_addresses() {
        assert!(decode_config_key("bademail@").is_err());
        assert!(decode_config_key("@example.com").is_err());
        assert!(decode_config_key("").is_err());
    }

    #[test]
    fn severity_tokens() {
        assert_eq!(Severity::default(), Severity::Info);
        assert_eq!(Severity::Failure.to_string(), "failure");
        assert_eq!(Severity::from_token("Success"), Some(Severity::Success));
        assert_eq!(Severity::from_token("debug"), None);
    }
}
