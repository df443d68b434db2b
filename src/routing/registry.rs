//! Sender registry: ordered glob patterns over routing keys.
//!
//! Entries are checked in registration order and the first one whose user
//! and domain globs both match wins, even if a later pattern is more
//! specific. The registry is built once at startup and only read afterwards.

use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::address::RoutingKey;
use crate::error::ConfigError;
use crate::mail::BodyFormat;
use crate::routing::notification::BackendConfig;
use crate::routing::template::Template;

/// One configured notification target.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub backend: Arc<BackendConfig>,
    pub title_template: Template,
    pub body_template: Template,
    /// Forced body format. `None` means use whatever the email carried.
    pub body_format: Option<BodyFormat>,
    /// Narrows `$body` to the part of the email body matching this pattern.
    pub body_pattern: Option<Regex>,
}

impl SenderConfig {
    /// A sender with the default templates and no overrides.
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            title_template: Template::default_title(),
            body_template: Template::default_body(),
            body_format: None,
            body_pattern: None,
        }
    }

    pub fn with_title_template(mut self, template: impl Into<String>) -> Self {
        self.title_template = Template::new(template);
        self
    }

    pub fn with_body_template(mut self, template: impl Into<String>) -> Self {
        self.body_template = Template::new(template);
        self
    }

    pub fn with_body_format(mut self, format: BodyFormat) -> Self {
        self.body_format = Some(format);
        self
    }

    /// Set the body pattern. Matching is case-insensitive and multi-line.
    pub fn with_body_pattern(mut self, pattern: &str) -> Result<Self, ConfigError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .multi_line(true)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "body_pattern".into(),
                message: e.to_string(),
            })?;
        self.body_pattern = Some(regex);
        Ok(self)
    }

    /// The text to expose as `$body`.
    ///
    /// Without a pattern this is the whole body. With one, it is the first
    /// capture group if the pattern has one, otherwise the whole match;
    /// `None` when the pattern doesn't match.
    pub fn select_body<'b>(&self, body: &'b str) -> Option<&'b str> {
        let Some(pattern) = &self.body_pattern else {
            return Some(body);
        };
        let caps = pattern.captures(body)?;
        caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str())
    }
}

struct Entry {
    pattern: RoutingKey,
    user: GlobMatcher,
    domain: GlobMatcher,
    sender: SenderConfig,
}

/// Ordered `(pattern, sender)` pairs with first-match lookup.
pub struct SenderRegistry {
    entries: Vec<Entry>,
}

impl SenderRegistry {
    /// Build a registry, compiling every pattern up front.
    ///
    /// Fails with `NoSendersConfigured` when `senders` is empty and with
    /// `InvalidValue` when a pattern is not a valid glob. Unbalanced `[` or
    /// `{` are glob errors here, not literals.
    pub fn new(
        senders: impl IntoIterator<Item = (RoutingKey, SenderConfig)>,
    ) -> Result<Self, ConfigError> {
        let entries = senders
            .into_iter()
            .map(|(pattern, sender)| {
                Ok(Entry {
                    user: compile_glob(pattern.user(), &pattern)?,
                    domain: compile_glob(pattern.domain(), &pattern)?,
                    pattern,
                    sender,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        if entries.is_empty() {
            return Err(ConfigError::NoSendersConfigured);
        }
        Ok(Self { entries })
    }

    /// Find the sender for a decoded routing key.
    pub fn find(&self, key: &RoutingKey) -> Option<&SenderConfig> {
        self.find_entry(key).map(|(_, sender)| sender)
    }

    /// Like [`find`](Self::find), also returning the pattern that matched.
    pub fn find_entry(&self, key: &RoutingKey) -> Option<(&RoutingKey, &SenderConfig)> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.user.is_match(key.user()) && e.domain.is_match(key.domain()))?;
        debug!(key = %key, pattern = %entry.pattern, "Matched sender pattern");
        Some((&entry.pattern, &entry.sender))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a successfully built registry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered patterns, in match order.
    pub fn patterns(&self) -> impl Iterator<Item = &RoutingKey> {
        self.entries.iter().map(|e| &e.pattern)
    }
}

impl std::fmt::Debug for SenderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.patterns()).finish()
    }
}

/// Shell-style glob: `*`, `?`, `[...]`, `[!...]` and `{a,b}`. No path
/// semantics and no backslash escapes.
fn compile_glob(glob: &str, pattern: &RoutingKey) -> Result<GlobMatcher, ConfigError> {
    GlobBuilder::new(glob)
        .literal_separator(false)
        .backslash_escape(false)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| ConfigError::InvalidValue {
            key: pattern.to_string(),
            message: e.kind().to_string(),
        })
}
