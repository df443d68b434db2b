//! The gateway facade used by the SMTP front end.
//!
//! Two entry points: recipient validation at `RCPT TO` time, and processing
//! of a complete message once `DATA` ends.

use std::sync::Arc;

use tracing::info;

use crate::address::{self, Recipient};
use crate::dispatch::{DispatchCoordinator, TransactionOutcome};
use crate::error::RecipientError;
use crate::mail;
use crate::routing::{Router, SenderRegistry, SimpleRouter};

pub struct Gateway {
    registry: Arc<SenderRegistry>,
    router: Arc<dyn Router>,
    coordinator: DispatchCoordinator,
}

impl Gateway {
    pub fn new(
        registry: Arc<SenderRegistry>,
        router: Arc<dyn Router>,
        coordinator: DispatchCoordinator,
    ) -> Self {
        Self {
            registry,
            router,
            coordinator,
        }
    }

    /// A gateway using the built-in [`SimpleRouter`] over `registry`.
    pub fn with_simple_router(registry: Arc<SenderRegistry>, coordinator: DispatchCoordinator) -> Self {
        let router = Arc::new(SimpleRouter::new(Arc::clone(&registry)));
        Self::new(registry, router, coordinator)
    }

    /// Decide whether an envelope recipient is acceptable.
    ///
    /// Pure with respect to the registry: the same address always gets the
    /// same answer.
    pub fn validate_recipient(&self, address: &str) -> Result<Recipient, RecipientError> {
        let recipient = address::decode(address)?;
        if self.registry.find(&recipient.key).is_none() {
            return Err(RecipientError::NotFound {
                key: recipient.key.to_string(),
            });
        }
        Ok(recipient)
    }

    /// Turn a received message into notifications and deliver them.
    pub async fn process_transaction(&self, raw: &[u8], recipients: &[String]) -> TransactionOutcome {
        let message = mail::extract(raw);
        info!(
            subject = %message.subject,
            from = %message.from,
            recipients = recipients.len(),
            attachments = message.attachments().len(),
            "Accepted email"
        );
        let notifications = self.router.notifications_for(&message, recipients);
        self.coordinator.dispatch(notifications).await
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("registry", &self.registry)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}
