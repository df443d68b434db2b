//! The notifier capability: whatever actually delivers a notification.

use async_trait::async_trait;

use crate::address::Severity;
use crate::dispatch::attachment::StagedAttachment;
use crate::error::NotifierError;
use crate::mail::BodyFormat;
use crate::routing::BackendConfig;

/// Everything a backend needs to deliver one notification.
#[derive(Debug)]
pub struct SubmitRequest<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub body_format: BodyFormat,
    pub severity: Severity,
    /// Staged copies of the email's attachments, owned by this submission.
    pub attachments: &'a [StagedAttachment],
    pub backend_config: &'a BackendConfig,
}

/// A notification backend.
///
/// `Ok(false)` reports a delivery failure without detail. An `Err` (or a
/// panic) is treated the same way, for this one notification only.
/// Implementations must not block forever; the coordinator applies no
/// timeout of its own.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn submit(&self, request: &SubmitRequest<'_>) -> Result<bool, NotifierError>;
}

/// Branding attached to outgoing notifications.
///
/// Passed to a notifier at construction; there is no global default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierAsset {
    pub app_id: String,
    pub app_desc: String,
    pub app_url: Option<String>,
    pub info_color: String,
    pub success_color: String,
    pub warning_color: String,
    pub failure_color: String,
}

impl NotifierAsset {
    /// Hex colour for a severity.
    pub fn color(&self, severity: Severity) -> &str {
        match severity {
            Severity::Info => &self.info_color,
            Severity::Success => &self.success_color,
            Severity::Warning => &self.warning_color,
            Severity::Failure => &self.failure_color,
        }
    }
}

impl Default for NotifierAsset {
    fn default() -> Self {
        Self {
            app_id: "mailgate".to_string(),
            app_desc: "mailgate SMTP notification relay".to_string(),
            app_url: None,
            info_color: "#2e6e99".to_string(),
            success_color: "#2e992e".to_string(),
            warning_color: "#99972e".to_string(),
            failure_color: "#993a2e".to_string(),
        }
    }
}
