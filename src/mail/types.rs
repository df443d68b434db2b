//! Email types shared by extraction, routing and dispatch.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// How a notification body should be interpreted by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    #[default]
    Text,
    Html,
    Markdown,
}

impl BodyFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Html => "html",
            Self::Markdown => "markdown",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "text" => Some(Self::Text),
            "html" => Some(Self::Html),
            "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

impl fmt::Display for BodyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file attached to an email, as named by the sender.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub data: Vec<u8>,
    pub filename: String,
}

impl Attachment {
    pub fn new(data: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            filename: filename.into(),
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("len", &self.data.len())
            .finish()
    }
}

/// An email accepted for notifying.
///
/// Built once per SMTP transaction and shared read-only by every recipient.
/// The attachment list is frozen at construction.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub subject: String,
    pub from: String,
    /// Resolved body text, trimmed and otherwise untouched.
    pub body: String,
    pub body_format: BodyFormat,
    attachments: Arc<[Attachment]>,
}

impl EmailMessage {
    pub fn new(
        subject: impl Into<String>,
        from: impl Into<String>,
        body: impl Into<String>,
        body_format: BodyFormat,
        attachments: Vec<Attachment>,
    ) -> Self {
        Self {
            subject: subject.into(),
            from: from.into(),
            body: body.into(),
            body_format,
            attachments: attachments.into(),
        }
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// A cheap handle on the attachment list for handing to notifications.
    pub fn shared_attachments(&self) -> Arc<[Attachment]> {
        Arc::clone(&self.attachments)
    }
}
