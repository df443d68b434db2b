//! HTTP webhook notifier.
//!
//! The backend config names one or more target URLs:
//!
//! ```yaml
//! urls:
//!   - json://hooks.example.com/notify     # JSON POST over http
//!   - jsons://hooks.example.com/notify    # JSON POST over https
//!   - https://hooks.example.com/upload    # multipart/form-data POST
//! ```
//!
//! A single `url:` key is accepted in place of `urls:`. A notification is
//! delivered only if every target answers with a 2xx status.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::address::Severity;
use crate::dispatch::attachment::StagedAttachment;
use crate::dispatch::notifier::{Notifier, NotifierAsset, SubmitRequest};
use crate::error::NotifierError;
use crate::mail::BodyFormat;
use crate::routing::BackendConfig;

const PAYLOAD_VERSION: &str = "1.0";

/// How a configured URL is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Json(String),
    Form(String),
}

impl Target {
    fn endpoint(&self) -> &str {
        match self {
            Self::Json(url) | Self::Form(url) => url,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonPayload<'a> {
    version: &'static str,
    title: &'a str,
    message: &'a str,
    #[serde(rename = "type")]
    kind: Severity,
    format: BodyFormat,
    app_id: &'a str,
    app_desc: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_url: Option<&'a str>,
    color: &'a str,
    attachments: Vec<JsonAttachment>,
}

#[derive(Debug, Serialize)]
struct JsonAttachment {
    filename: String,
    base64: String,
}

/// Delivers notifications by POSTing to HTTP endpoints.
pub struct WebhookNotifier {
    client: reqwest::Client,
    asset: NotifierAsset,
}

impl WebhookNotifier {
    pub fn new(asset: NotifierAsset, timeout: Duration) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mailgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotifierError::Client(e.to_string()))?;
        Ok(Self { client, asset })
    }

    async fn post_json(
        &self,
        endpoint: &str,
        request: &SubmitRequest<'_>,
    ) -> Result<bool, NotifierError> {
        let mut attachments = Vec::with_capacity(request.attachments.len());
        for staged in request.attachments {
            attachments.push(JsonAttachment {
                filename: display_name(staged),
                base64: STANDARD.encode(tokio::fs::read(staged.path()).await?),
            });
        }
        let payload = JsonPayload {
            version: PAYLOAD_VERSION,
            title: request.title,
            message: request.body,
            kind: request.severity,
            format: request.body_format,
            app_id: &self.asset.app_id,
            app_desc: &self.asset.app_desc,
            app_url: self.asset.app_url.as_deref(),
            color: self.asset.color(request.severity),
            attachments,
        };

        let resp = self
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| request_error(endpoint, e))?;
        Ok(check_status(endpoint, resp.status()))
    }

    async fn post_form(
        &self,
        endpoint: &str,
        request: &SubmitRequest<'_>,
    ) -> Result<bool, NotifierError> {
        let mut form = Form::new()
            .text("title", request.title.to_string())
            .text("body", request.body.to_string())
            .text("type", request.severity.as_str())
            .text("format", request.body_format.as_str())
            .text("app_id", self.asset.app_id.clone());
        for (i, staged) in request.attachments.iter().enumerate() {
            let bytes = tokio::fs::read(staged.path()).await?;
            let part = Part::bytes(bytes).file_name(display_name(staged));
            form = form.part(format!("file{:02}", i + 1), part);
        }

        let resp = self
            .client
            .post(endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error(endpoint, e))?;
        Ok(check_status(endpoint, resp.status()))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn submit(&self, request: &SubmitRequest<'_>) -> Result<bool, NotifierError> {
        let urls = target_urls(request.backend_config)?;
        let mut delivered = true;
        for url in &urls {
            let result = match parse_target(url) {
                Ok(target) => {
                    debug!(url = %url, endpoint = %target.endpoint(), "Posting notification");
                    match &target {
                        Target::Json(endpoint) => self.post_json(endpoint, request).await,
                        Target::Form(endpoint) => self.post_form(endpoint, request).await,
                    }
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(true) => debug!(url = %url, "Webhook accepted notification"),
                Ok(false) => delivered = false,
                Err(e) => {
                    warn!(url = %url, error = %e, "Webhook delivery failed");
                    delivered = false;
                }
            }
        }
        Ok(delivered)
    }
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("asset", &self.asset)
            .finish_non_exhaustive()
    }
}

/// The URLs named by a backend config, in order.
///
/// Entries of `urls` may be plain strings or single-key mappings whose key
/// is the URL.
fn target_urls(config: &BackendConfig) -> Result<Vec<String>, NotifierError> {
    let urls = match (config.get("urls"), config.get("url")) {
        (Some(Value::Array(items)), _) => items
            .iter()
            .map(|item| match item {
                Value::String(url) => Ok(vec![url.clone()]),
                Value::Object(map) => Ok(map.keys().cloned().collect()),
                other => Err(NotifierError::InvalidBackendConfig(format!(
                    "unexpected entry in 'urls': {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect(),
        (Some(Value::String(url)), _) | (None, Some(Value::String(url))) => vec![url.clone()],
        (Some(_), _) => {
            return Err(NotifierError::InvalidBackendConfig(
                "'urls' must be a list of URLs".into(),
            ));
        }
        (None, _) => {
            return Err(NotifierError::InvalidBackendConfig(
                "no 'urls' or 'url' key".into(),
            ));
        }
    };
    if urls.is_empty() {
        return Err(NotifierError::InvalidBackendConfig("'urls' is empty".into()));
    }
    Ok(urls)
}

fn parse_target(url: &str) -> Result<Target, NotifierError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| NotifierError::UnsupportedUrl(url.to_string()))?;
    if rest.is_empty() {
        return Err(NotifierError::UnsupportedUrl(url.to_string()));
    }
    match scheme.to_ascii_lowercase().as_str() {
        "json" => Ok(Target::Json(format!("http://{rest}"))),
        "jsons" => Ok(Target::Json(format!("https://{rest}"))),
        "http" | "https" => Ok(Target::Form(url.to_string())),
        _ => Err(NotifierError::UnsupportedUrl(url.to_string())),
    }
}

/// Filename to present to the endpoint. Unnamed attachments fall back to
/// the staged file's own name.
fn display_name(staged: &StagedAttachment) -> String {
    if !staged.filename().is_empty() {
        return staged.filename().to_string();
    }
    staged
        .path()
        .file_name()
        .and_then(|n| n.to_str())
        .map_or_else(|| "attachment".to_string(), str::to_string)
}

fn check_status(endpoint: &str, status: reqwest::StatusCode) -> bool {
    if status.is_success() {
        return true;
    }
    warn!(url = %endpoint, status = %status, "Webhook rejected notification");
    false
}

fn request_error(endpoint: &str, e: reqwest::Error) -> NotifierError {
    NotifierError::Request {
        url: endpoint.to_string(),
        reason: e.to_string(),
    }
}
