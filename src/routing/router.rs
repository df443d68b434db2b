//! Routers turn one accepted email into notifications.

use std::sync::Arc;

use tracing::{error, warn};

use crate::address::{self, Recipient};
use crate::mail::EmailMessage;
use crate::routing::notification::Notification;
use crate::routing::registry::{SenderConfig, SenderRegistry};
use crate::routing::template::TemplateContext;

/// A single-pass sequence of notifications. Not restartable: producing it
/// logs skipped recipients as a side effect.
pub type NotificationIter<'a> = Box<dyn Iterator<Item = Notification> + Send + 'a>;

/// Converts an email plus its envelope recipients into notifications.
///
/// Implementations must be a pure function of their inputs and whatever
/// configuration they were constructed with.
pub trait Router: Send + Sync {
    fn notifications_for<'a>(
        &'a self,
        message: &'a EmailMessage,
        recipients: &'a [String],
    ) -> NotificationIter<'a>;
}

/// The built-in router: decode → registry lookup → render, per recipient.
///
/// Recipients that fail to decode or match no sender are skipped with a
/// warning; they should already have been refused at `RCPT TO`.
#[derive(Debug, Clone)]
pub struct SimpleRouter {
    registry: Arc<SenderRegistry>,
}

impl SimpleRouter {
    pub fn new(registry: Arc<SenderRegistry>) -> Self {
        Self { registry }
    }

    fn route(&self, message: &EmailMessage, address: &str) -> Option<Notification> {
        let recipient = match address::decode(address) {
            Ok(recipient) => recipient,
            Err(e) => {
                warn!(recipient = %address, error = %e, "Skipping undecodable recipient");
                return None;
            }
        };
        let Some(sender) = self.registry.find(&recipient.key) else {
            warn!(recipient = %address, "Skipping recipient with no configured sender");
            return None;
        };
        let Some(body) = sender.select_body(&message.body) else {
            error!(
                recipient = %address,
                "Body pattern did not match email body; skipping recipient"
            );
            return None;
        };
        Some(render(message, &recipient, sender, body))
    }
}

fn render(
    message: &EmailMessage,
    recipient: &Recipient,
    sender: &SenderConfig,
    body: &str,
) -> Notification {
    let to = recipient.key.to_string();
    let config = recipient.key.as_configured();
    let ctx = TemplateContext {
        subject: &message.subject,
        from: &message.from,
        body,
        to: &to,
        config: &config,
        kind: recipient.severity.as_str(),
    };

    Notification {
        key: recipient.key.clone(),
        backend_config: Arc::clone(&sender.backend),
        title: sender.title_template.render(&ctx),
        body: sender.body_template.render(&ctx),
        body_format: sender.body_format.unwrap_or(message.body_format),
        severity: recipient.severity,
        attachments: message.shared_attachments(),
    }
}

impl Router for SimpleRouter {
    fn notifications_for<'a>(
        &'a self,
        message: &'a EmailMessage,
        recipients: &'a [String],
    ) -> NotificationIter<'a> {
        Box::new(
            recipients
                .iter()
                .filter_map(move |address| self.route(message, address)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{RoutingKey, Severity};
    use crate::mail::{Attachment, BodyFormat};
    use crate::routing::notification::BackendConfig;

    fn router(senders: Vec<(RoutingKey, SenderConfig)>) -> SimpleRouter {
        SimpleRouter::new(Arc::new(SenderRegistry::new(senders).unwrap()))
    }

    fn backend(name: &str) -> BackendConfig {
        BackendConfig::new(serde_json::json!({ "urls": [format!("json://{name}")] }))
    }

    fn email(body: &str, format: BodyFormat) -> EmailMessage {
        EmailMessage::new(
            "Test",
            "test@test.test",
            body,
            format,
            vec![Attachment::new(b"data".to_vec(), "a.txt")],
        )
    }

    fn collect(router: &SimpleRouter, msg: &EmailMessage, rcpts: &[&str]) -> Vec<Notification> {
        let rcpts: Vec<String> = rcpts.iter().map(|s| s.to_string()).collect();
        router.notifications_for(msg, &rcpts).collect()
    }

    // ── rendering ───────────────────────────────────────────────────

    #[test]
    fn body_template_substitution() {
        let r = router(vec![(
            RoutingKey::new("test", "test.test"),
            SenderConfig::new(backend("a"))
                .with_title_template("$subject")
                .with_body_template("hello $body")
                .with_body_format(BodyFormat::Text),
        )]);
        let out = collect(&r, &email("world", BodyFormat::Text), &["test@test.test"]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Test");
        assert_eq!(out[0].body, "hello world");
        assert_eq!(out[0].severity, Severity::Info);
    }

    #[test]
    fn title_template_substitution() {
        let r = router(vec![(
            RoutingKey::new("test", "test.test"),
            SenderConfig::new(backend("a")).with_title_template("hello $subject"),
        )]);
        let msg = EmailMessage::new("world", "x@y.z", "test", BodyFormat::Text, vec![]);
        let out = collect(&r, &msg, &["test@test.test"]);
        assert_eq!(out[0].title, "hello world");
        assert_eq!(out[0].body, "test");
    }

    #[test]
    fn default_templates_and_routing_variables() {
        let r = router(vec![(
            RoutingKey::with_default_domain("ops"),
            SenderConfig::new(backend("a")).with_body_template("$to|$config|$type"),
        )]);
        let out = collect(&r, &email("b", BodyFormat::Text), &["ops.failure@mailrise.xyz"]);
        assert_eq!(out[0].title, "Test (test@test.test)");
        assert_eq!(out[0].body, "ops@mailrise.xyz|ops|failure");
        assert_eq!(out[0].severity, Severity::Failure);
    }

    #[test]
    fn body_pattern_narrows_body() {
        let r = router(vec![(
            RoutingKey::new("test", "test.test"),
            SenderConfig::new(backend("a"))
                .with_body_template("$body its me!")
                .with_body_pattern(r"<p>(.+?)</p>")
                .unwrap(),
        )]);
        let msg = email(
            "<html><h1>Ignore me</h1><p>hello world</p></html>",
            BodyFormat::Text,
        );
        let out = collect(&r, &msg, &["test@test.test"]);
        assert_eq!(out[0].body, "hello world its me!");
    }

    #[test]
    fn unmatched_body_pattern_skips_recipient() {
        let r = router(vec![(
            RoutingKey::new("*", "*"),
            SenderConfig::new(backend("a"))
                .with_body_pattern(r"never-present")
                .unwrap(),
        )]);
        let out = collect(&r, &email("body", BodyFormat::Text), &["a@b.c"]);
        assert!(out.is_empty());
    }

    // ── body format ─────────────────────────────────────────────────

    #[test]
    fn sender_format_overrides_email_format() {
        let r = router(vec![(
            RoutingKey::new("*", "*"),
            SenderConfig::new(backend("a")).with_body_format(BodyFormat::Markdown),
        )]);
        let out = collect(&r, &email("<b>x</b>", BodyFormat::Html), &["a@b.c"]);
        assert_eq!(out[0].body_format, BodyFormat::Markdown);
    }

    #[test]
    fn email_format_used_without_override() {
        let r = router(vec![(RoutingKey::new("*", "*"), SenderConfig::new(backend("a")))]);
        let out = collect(&r, &email("<b>x</b>", BodyFormat::Html), &["a@b.c"]);
        assert_eq!(out[0].body_format, BodyFormat::Html);
    }

    // ── recipients ──────────────────────────────────────────────────

    #[test]
    fn bad_recipients_are_skipped_not_fatal() {
        let r = router(vec![(
            RoutingKey::new("ok", "example.com"),
            SenderConfig::new(backend("a")),
        )]);
        let out = collect(
            &r,
            &email("b", BodyFormat::Text),
            &["not-an-address", "unknown@example.com", "ok.warning@example.com"],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key, RoutingKey::new("ok", "example.com"));
        assert_eq!(out[0].severity, Severity::Warning);
    }

    #[test]
    fn one_notification_per_recipient_even_with_shared_sender() {
        let r = router(vec![(RoutingKey::new("*", "*"), SenderConfig::new(backend("a")))]);
        let msg = email("b", BodyFormat::Text);
        let out = collect(&r, &msg, &["a@x.com", "b.success@x.com", "a@x.com"]);
        assert_eq!(out.len(), 3);
        for n in &out {
            assert!(Arc::ptr_eq(&n.attachments, &msg.shared_attachments()));
            assert_eq!(n.attachments.len(), 1);
        }
    }

    #[test]
    fn no_recipients_yields_nothing() {
        let r = router(vec![(RoutingKey::new("*", "*"), SenderConfig::new(backend("a")))]);
        assert!(collect(&r, &email("b", BodyFormat::Text), &[]).is_empty());
    }

    #[test]
    fn sequence_is_lazy() {
        let r = router(vec![(RoutingKey::new("*", "*"), SenderConfig::new(backend("a")))]);
        let msg = email("b", BodyFormat::Text);
        let rcpts = vec!["a@x.com".to_string(), "b@x.com".to_string()];
        let mut iter = r.notifications_for(&msg, &rcpts);
        assert_eq!(iter.next().unwrap().key.user(), "a");
        assert_eq!(iter.next().unwrap().key.user(), "b");
        assert!(iter.next().is_none());
    }
}
