//! Recipient routing, from an accepted email to render-ready notifications.
//!
//! `SenderRegistry` maps routing-key patterns to sender configurations,
//! `Template` renders titles and bodies, and a `Router` turns one email plus
//! its recipient list into a lazy sequence of `Notification`s.

pub mod notification;
pub mod registry;
pub mod router;
pub mod template;

pub use notification::{BackendConfig, Notification};
pub use registry::{SenderConfig, SenderRegistry};
pub use router::{NotificationIter, Router, SimpleRouter};
pub use template::{Template, TemplateContext};
