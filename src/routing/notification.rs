//! The unit of work handed from routing to dispatch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::address::{RoutingKey, Severity};
use crate::mail::{Attachment, BodyFormat};

/// Backend configuration for one sender, opaque to routing.
///
/// Only the notifier interprets its contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendConfig(serde_json::Value);

impl BackendConfig {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Look up a top-level field.
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }
}

/// A fully rendered notification for one recipient.
///
/// Consumed exactly once by the dispatch coordinator, which turns it into
/// one notifier submission.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The routing key this notification was produced for.
    pub key: RoutingKey,
    pub backend_config: Arc<BackendConfig>,
    pub title: String,
    pub body: String,
    pub body_format: BodyFormat,
    pub severity: Severity,
    pub attachments: Arc<[Attachment]>,
}
