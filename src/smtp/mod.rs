//! SMTP front end: accepts mail and hands it to the [`Gateway`](crate::gateway::Gateway).

pub mod auth;
pub mod server;
pub mod session;

pub use auth::{AuthMechanism, Authenticator, BasicAuthenticator, Credentials};
pub use server::{handle_connection, serve};
pub use session::{Action, Command, Reply, Session, SmtpContext};
