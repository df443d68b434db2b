//! Notification dispatch: concurrent submission to the notifier backend.
//!
//! Every notification gets its own scoped set of staged attachment files,
//! one notifier call, and unconditional cleanup. Failures are aggregated
//! into a single `TransactionOutcome` for the SMTP layer.

pub mod attachment;
pub mod coordinator;
pub mod notifier;
pub mod webhook;

pub use attachment::{AttachmentScope, AttachmentStaging, StagedAttachment};
pub use coordinator::{DispatchCoordinator, TransactionOutcome};
pub use notifier::{Notifier, NotifierAsset, SubmitRequest};
pub use webhook::WebhookNotifier;
