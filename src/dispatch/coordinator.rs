//! Fan-out of one transaction's notifications to the notifier.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::dispatch::attachment::AttachmentStaging;
use crate::dispatch::notifier::{Notifier, SubmitRequest};
use crate::error::NotifierError;
use crate::routing::Notification;

/// Aggregate result of dispatching one email.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub submitted: usize,
    pub failed: usize,
}

impl TransactionOutcome {
    /// True if at least one notification was not delivered. Zero
    /// notifications is not a failure.
    pub fn any_failed(&self) -> bool {
        self.failed > 0
    }
}

/// Submits notifications concurrently and cleans up after each one.
pub struct DispatchCoordinator {
    notifier: Arc<dyn Notifier>,
    staging: AttachmentStaging,
}

impl DispatchCoordinator {
    pub fn new(notifier: Arc<dyn Notifier>, staging: AttachmentStaging) -> Self {
        Self { notifier, staging }
    }

    /// Submit every notification and wait for all of them.
    ///
    /// One notification failing (including a notifier panic) never stops
    /// the others.
    pub async fn dispatch<I>(&self, notifications: I) -> TransactionOutcome
    where
        I: IntoIterator<Item = Notification>,
    {
        let submissions: Vec<_> = notifications
            .into_iter()
            .map(|notification| self.submit_one(notification))
            .collect();
        let submitted = submissions.len();
        if submitted == 0 {
            debug!("No notifications to dispatch");
            return TransactionOutcome::default();
        }

        let results = join_all(submissions).await;
        let failed = results.iter().filter(|delivered| !**delivered).count();
        info!(submitted, failed, "Dispatch complete");
        TransactionOutcome { submitted, failed }
    }

    async fn submit_one(&self, notification: Notification) -> bool {
        let key = notification.key.to_string();

        let staging = self.staging.clone();
        let attachments = Arc::clone(&notification.attachments);
        let scope = match tokio::task::spawn_blocking(move || staging.stage(&attachments)).await {
            Ok(Ok(scope)) => scope,
            Ok(Err(e)) => {
                let e = NotifierError::Attachment(e);
                error!(recipient = %key, error = %e, "Failed to stage attachments");
                return false;
            }
            Err(e) => {
                error!(recipient = %key, error = %e, "Attachment staging task failed");
                return false;
            }
        };

        let result = {
            let request = SubmitRequest {
                title: &notification.title,
                body: &notification.body,
                body_format: notification.body_format,
                severity: notification.severity,
                attachments: scope.files(),
                backend_config: &notification.backend_config,
            };
            AssertUnwindSafe(self.notifier.submit(&request))
                .catch_unwind()
                .await
        };

        let released = scope.release();
        debug!(recipient = %key, released, "Released staged attachments");

        match result {
            Ok(Ok(true)) => {
                info!(recipient = %key, severity = %notification.severity, "Notification delivered");
                true
            }
            Ok(Ok(false)) => {
                warn!(recipient = %key, "Notifier reported delivery failure");
                false
            }
            Ok(Err(e)) => {
                warn!(recipient = %key, error = %e, "Notifier returned an error");
                false
            }
            Err(_) => {
                error!(recipient = %key, "Notifier panicked");
                false
            }
        }
    }
}

impl std::fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCoordinator")
            .field("staging", &self.staging)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::address::{RoutingKey, Severity};
    use crate::mail::{Attachment, BodyFormat};
    use crate::routing::BackendConfig;

    /// Behaves according to the notification title and records the staged
    /// paths it was handed.
    #[derive(Default)]
    struct ScriptedNotifier {
        seen: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl Notifier for ScriptedNotifier {
        async fn submit(&self, request: &SubmitRequest<'_>) -> Result<bool, NotifierError> {
            for staged in request.attachments {
                assert!(staged.path().exists());
                assert_eq!(std::fs::read(staged.path()).unwrap(), b"payload");
                self.seen.lock().unwrap().push(staged.path().to_path_buf());
            }
            match request.title {
                "ok" => Ok(true),
                "fail" => Ok(false),
                "err" => Err(NotifierError::UnsupportedUrl("bogus://".into())),
                "panic" => panic!("backend blew up"),
                other => unreachable!("unexpected title {other}"),
            }
        }
    }

    fn notification(title: &str, attachments: Arc<[Attachment]>) -> Notification {
        Notification {
            key: RoutingKey::new(title, "example.com"),
            backend_config: Arc::new(BackendConfig::new(serde_json::json!({}))),
            title: title.to_string(),
            body: "body".to_string(),
            body_format: BodyFormat::Text,
            severity: Severity::Info,
            attachments,
        }
    }

    fn shared_attachments() -> Arc<[Attachment]> {
        Arc::from(vec![
            Attachment::new(b"payload".to_vec(), "a.txt"),
            Attachment::new(b"payload".to_vec(), "b.bin"),
        ])
    }

    fn coordinator(notifier: Arc<ScriptedNotifier>) -> DispatchCoordinator {
        DispatchCoordinator::new(notifier, AttachmentStaging::default())
    }

    // ── outcomes ────────────────────────────────────────────────────

    #[tokio::test]
    async fn one_failure_marks_transaction_failed() {
        let notifier = Arc::new(ScriptedNotifier::default());
        let files = shared_attachments();
        let outcome = coordinator(notifier.clone())
            .dispatch(vec![
                notification("ok", files.clone()),
                notification("fail", files.clone()),
                notification("ok", files),
            ])
            .await;
        assert_eq!(outcome, TransactionOutcome { submitted: 3, failed: 1 });
        assert!(outcome.any_failed());
    }

    #[tokio::test]
    async fn all_delivered_is_success() {
        let notifier = Arc::new(ScriptedNotifier::default());
        let outcome = coordinator(notifier)
            .dispatch(vec![notification("ok", shared_attachments())])
            .await;
        assert!(!outcome.any_failed());
        assert_eq!(outcome.submitted, 1);
    }

    #[tokio::test]
    async fn no_notifications_is_not_a_failure() {
        let notifier = Arc::new(ScriptedNotifier::default());
        let outcome = coordinator(notifier).dispatch(Vec::new()).await;
        assert_eq!(outcome, TransactionOutcome::default());
        assert!(!outcome.any_failed());
    }

    #[tokio::test]
    async fn errors_and_panics_count_as_failures() {
        let notifier = Arc::new(ScriptedNotifier::default());
        let files = shared_attachments();
        let outcome = coordinator(notifier)
            .dispatch(vec![
                notification("err", files.clone()),
                notification("panic", files.clone()),
                notification("ok", files),
            ])
            .await;
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.submitted, 3);
    }

    // ── concurrency ─────────────────────────────────────────────────

    /// Holds every "ok"/"fail" submission at a barrier until all of them
    /// have arrived. "panic" panics without waiting.
    struct RendezvousNotifier {
        barrier: tokio::sync::Barrier,
        released: Mutex<usize>,
    }

    #[async_trait]
    impl Notifier for RendezvousNotifier {
        async fn submit(&self, request: &SubmitRequest<'_>) -> Result<bool, NotifierError> {
            if request.title == "panic" {
                panic!("backend blew up");
            }
            self.barrier.wait().await;
            *self.released.lock().unwrap() += 1;
            Ok(request.title == "ok")
        }
    }

    #[tokio::test]
    async fn submissions_are_in_flight_together() {
        let notifier = Arc::new(RendezvousNotifier {
            barrier: tokio::sync::Barrier::new(3),
            released: Mutex::new(0),
        });
        let coordinator = DispatchCoordinator::new(notifier.clone(), AttachmentStaging::default());
        let none: Arc<[Attachment]> = Arc::from(Vec::new());

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            coordinator.dispatch(vec![
                notification("ok", none.clone()),
                notification("panic", none.clone()),
                notification("fail", none.clone()),
                notification("ok", none),
            ]),
        )
        .await
        .expect("submissions ran one after another");

        assert_eq!(outcome, TransactionOutcome { submitted: 4, failed: 2 });
        assert_eq!(*notifier.released.lock().unwrap(), 3);
    }

    // ── attachment lifecycle ────────────────────────────────────────

    #[tokio::test]
    async fn staged_files_are_private_and_removed_on_every_path() {
        let notifier = Arc::new(ScriptedNotifier::default());
        let files = shared_attachments();
        coordinator(notifier.clone())
            .dispatch(vec![
                notification("ok", files.clone()),
                notification("fail", files.clone()),
                notification("err", files.clone()),
                notification("panic", files),
            ])
            .await;

        let seen = notifier.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 8);
        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), seen.len(), "staged paths must not be shared");
        for path in seen {
            assert!(!path.exists(), "{} was not released", path.display());
        }
    }

    #[tokio::test]
    async fn staging_failure_fails_only_that_notification() {
        let notifier = Arc::new(ScriptedNotifier::default());
        let coordinator = DispatchCoordinator::new(
            notifier,
            AttachmentStaging::new(Some(PathBuf::from("/nonexistent/mailgate"))),
        );
        let outcome = coordinator
            .dispatch(vec![
                notification("ok", shared_attachments()),
                notification("ok", Arc::from(Vec::new())),
            ])
            .await;
        assert_eq!(outcome, TransactionOutcome { submitted: 2, failed: 1 });
    }
}
