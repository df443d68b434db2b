//! Inbound email model and MIME extraction.

pub mod extract;
pub mod types;

pub use extract::{extract, resolve_body};
pub use types::{Attachment, BodyFormat, EmailMessage};
