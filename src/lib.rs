//! mailgate: an SMTP server that turns incoming email into notifications.
//!
//! Recipient addresses select a configured sender (`user.severity@domain`),
//! message content is rendered through per-sender templates, and each
//! resulting notification is handed to a notifier backend.

pub mod address;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod mail;
pub mod routing;
pub mod smtp;
