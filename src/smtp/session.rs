//! Transport-free SMTP session state machine.
//!
//! The server feeds command lines in and writes the returned replies out;
//! message data is collected by the server and handed back through
//! [`Session::receive_data`]. Nothing here touches a socket, so the whole
//! protocol surface is testable with plain strings.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::RecipientError;
use crate::gateway::Gateway;
use crate::smtp::auth::{
    AuthMechanism, Authenticator, Credentials, LOGIN_PASSWORD_CHALLENGE, LOGIN_USERNAME_CHALLENGE,
    decode_base64,
};

/// Everything a session needs, shared by all connections.
pub struct SmtpContext {
    pub gateway: Arc<Gateway>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Name advertised in the greeting and EHLO reply.
    pub hostname: String,
    pub max_message_size: usize,
}

// ── Replies ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// Wire form: every line but the last uses `-` after the code.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            out.push_str(&format!("{}{sep}{line}\r\n", self.code));
        }
        if self.lines.is_empty() {
            out.push_str(&format!("{} \r\n", self.code));
        }
        out
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// What the server should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Reply(Reply),
    /// Send the `354` reply, then read message data.
    ReadData(Reply),
    /// Send the reply and close the connection.
    Close(Reply),
}

// ── Commands ────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SyntaxError(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ehlo(String),
    Helo(String),
    /// Reverse-path; empty for the null sender.
    Mail(String),
    Rcpt(String),
    Data,
    Rset,
    Noop,
    Quit,
    Auth {
        mechanism: String,
        initial_response: Option<String>,
    },
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, SyntaxError> {
        fn prefix_match(line: &str, candidate: &str) -> bool {
            line.len() >= candidate.len()
                && line.is_char_boundary(candidate.len())
                && line[..candidate.len()].eq_ignore_ascii_case(candidate)
        }

        /// `<path> [params]` or a bare path. Parameters are ignored.
        fn extract_path(arg: &str) -> Result<&str, SyntaxError> {
            let arg = arg.trim_start();
            if let Some(rest) = arg.strip_prefix('<') {
                let end = rest
                    .find('>')
                    .ok_or_else(|| SyntaxError(format!("expected '>': {arg:?}")))?;
                return Ok(&rest[..end]);
            }
            Ok(arg.split_whitespace().next().unwrap_or(""))
        }

        let line = line.trim_start();
        let verb = line.split_whitespace().next().unwrap_or("");
        let rest = line.get(verb.len()..).unwrap_or("").trim();

        Ok(if line.eq_ignore_ascii_case("QUIT") {
            Self::Quit
        } else if line.eq_ignore_ascii_case("DATA") {
            Self::Data
        } else if line.eq_ignore_ascii_case("RSET") {
            Self::Rset
        } else if verb.eq_ignore_ascii_case("NOOP") {
            Self::Noop
        } else if verb.eq_ignore_ascii_case("EHLO") || verb.eq_ignore_ascii_case("HELO") {
            let domain = rest;
            if domain.is_empty() {
                return Err(SyntaxError(format!("{} requires a domain", verb.to_ascii_uppercase())));
            }
            if verb.eq_ignore_ascii_case("EHLO") {
                Self::Ehlo(domain.to_string())
            } else {
                Self::Helo(domain.to_string())
            }
        } else if prefix_match(line, "MAIL FROM:") {
            Self::Mail(extract_path(&line[10..])?.to_string())
        } else if prefix_match(line, "RCPT TO:") {
            let path = extract_path(&line[8..])?;
            if path.is_empty() {
                return Err(SyntaxError("null path not permitted as a recipient".into()));
            }
            Self::Rcpt(path.to_string())
        } else if verb.eq_ignore_ascii_case("AUTH") {
            let mut parts = rest.split_whitespace();
            let mechanism = parts
                .next()
                .ok_or_else(|| SyntaxError("AUTH requires a mechanism".into()))?;
            Self::Auth {
                mechanism: mechanism.to_string(),
                initial_response: parts.next().map(str::to_string),
            }
        } else if verb.eq_ignore_ascii_case("MAIL") || verb.eq_ignore_ascii_case("RCPT") {
            return Err(SyntaxError(format!("malformed {}", verb.to_ascii_uppercase())));
        } else {
            Self::Unknown(line.to_string())
        })
    }
}

// ── Session ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthStep {
    Idle,
    Plain,
    LoginUser,
    LoginPassword(String),
}

#[derive(Debug)]
struct Transaction {
    sender: String,
    recipients: Vec<String>,
}

pub struct Session {
    ctx: Arc<SmtpContext>,
    peer_name: Option<String>,
    authenticated_as: Option<String>,
    auth_step: AuthStep,
    transaction: Option<Transaction>,
}

impl Session {
    pub fn new(ctx: Arc<SmtpContext>) -> Self {
        Self {
            ctx,
            peer_name: None,
            authenticated_as: None,
            auth_step: AuthStep::Idle,
            transaction: None,
        }
    }

    pub fn greeting(&self) -> Reply {
        Reply::new(220, format!("{} ESMTP mailgate", self.ctx.hostname))
    }

    pub fn max_message_size(&self) -> usize {
        self.ctx.max_message_size
    }

    /// Handle one command line, without its line terminator.
    pub fn handle_line(&mut self, line: &str) -> Action {
        if self.auth_step != AuthStep::Idle {
            return Action::Reply(self.continue_auth(line));
        }

        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                return Action::Reply(Reply::new(
                    501,
                    format!("5.5.2 Syntax error in command or arguments: {e}"),
                ));
            }
        };
        if let Some(verb) = line.split_whitespace().next() {
            debug!(verb = %verb.to_ascii_uppercase(), "SMTP command");
        }

        let reply = match command {
            Command::Quit => return Action::Close(Reply::new(221, "2.0.0 Bye")),
            Command::Ehlo(domain) => self.ehlo(domain),
            Command::Helo(domain) => {
                self.transaction = None;
                self.peer_name = Some(domain);
                Reply::new(250, self.ctx.hostname.clone())
            }
            Command::Mail(sender) => self.mail(sender),
            Command::Rcpt(address) => self.rcpt(&address),
            Command::Data => match &self.transaction {
                None => Reply::new(503, "5.5.1 MAIL FROM must be issued first"),
                Some(t) if t.recipients.is_empty() => {
                    Reply::new(503, "5.5.1 RCPT TO must be issued first")
                }
                Some(_) => {
                    return Action::ReadData(Reply::new(354, "End data with <CR><LF>.<CR><LF>"));
                }
            },
            Command::Rset => {
                self.transaction = None;
                Reply::new(250, "2.0.0 OK")
            }
            Command::Noop => Reply::new(250, "2.0.0 OK"),
            Command::Auth {
                mechanism,
                initial_response,
            } => self.auth(&mechanism, initial_response.as_deref()),
            Command::Unknown(cmd) => Reply::new(502, format!("5.5.2 Command not recognized: {cmd}")),
        };
        Action::Reply(reply)
    }

    /// Deliver the collected (already dot-unstuffed) message data.
    pub async fn receive_data(&mut self, data: &[u8]) -> Reply {
        let Some(transaction) = self.transaction.take() else {
            return Reply::new(503, "5.5.1 MAIL FROM must be issued first");
        };
        debug!(
            sender = %transaction.sender,
            size = data.len(),
            "Received message data"
        );
        let outcome = self
            .ctx
            .gateway
            .process_transaction(data, &transaction.recipients)
            .await;
        if outcome.any_failed() {
            Reply::new(450, "4.3.0 Failed to send one or more notifications")
        } else {
            Reply::new(250, "2.0.0 OK")
        }
    }

    /// The message exceeded the size limit; the transaction is abandoned.
    pub fn reject_oversized(&mut self) -> Reply {
        self.transaction = None;
        warn!(limit = self.ctx.max_message_size, "Rejected oversized message");
        Reply::new(
            552,
            format!(
                "5.3.4 Message exceeds maximum size of {} bytes",
                self.ctx.max_message_size
            ),
        )
    }

    fn ehlo(&mut self, domain: String) -> Reply {
        self.transaction = None;
        self.peer_name = Some(domain);
        let mut lines = vec![
            self.ctx.hostname.clone(),
            "8BITMIME".to_string(),
            format!("SIZE {}", self.ctx.max_message_size),
        ];
        if self.ctx.authenticator.is_some() {
            lines.push("AUTH PLAIN LOGIN".to_string());
        }
        Reply::multiline(250, lines)
    }

    fn mail(&mut self, sender: String) -> Reply {
        if self.peer_name.is_none() {
            return Reply::new(503, "5.5.1 Send EHLO or HELO first");
        }
        if self.ctx.authenticator.is_some() && self.authenticated_as.is_none() {
            return Reply::new(530, "5.7.0 Authentication required");
        }
        if self.transaction.is_some() {
            return Reply::new(503, "5.5.1 MAIL FROM already issued; you must RSET first");
        }
        self.transaction = Some(Transaction {
            sender,
            recipients: Vec::new(),
        });
        Reply::new(250, "2.1.0 OK")
    }

    fn rcpt(&mut self, address: &str) -> Reply {
        let Some(transaction) = self.transaction.as_mut() else {
            return Reply::new(503, "5.5.1 MAIL FROM must be issued first");
        };
        match self.ctx.gateway.validate_recipient(address) {
            Ok(recipient) => {
                debug!(recipient = %address, key = %recipient.key, "Accepted recipient");
                transaction.recipients.push(address.to_string());
                Reply::new(250, "2.1.5 OK")
            }
            Err(e @ RecipientError::InvalidAddress { .. }) => {
                warn!(recipient = %address, error = %e, "Rejected recipient");
                Reply::new(550, format!("5.1.3 {e}"))
            }
            Err(e @ RecipientError::NotFound { .. }) => {
                warn!(recipient = %address, error = %e, "Rejected recipient");
                Reply::new(551, "5.1.1 Recipient does not exist in configuration file")
            }
        }
    }

    fn auth(&mut self, mechanism: &str, initial_response: Option<&str>) -> Reply {
        if self.ctx.authenticator.is_none() {
            return Reply::new(502, "5.5.1 AUTH not available");
        }
        if self.peer_name.is_none() {
            return Reply::new(503, "5.5.1 Send EHLO first");
        }
        if self.authenticated_as.is_some() {
            return Reply::new(503, "5.5.1 Already authenticated");
        }
        if self.transaction.is_some() {
            return Reply::new(503, "5.5.1 AUTH not permitted during a mail transaction");
        }

        match (AuthMechanism::from_token(mechanism), initial_response) {
            (None, _) => Reply::new(504, "5.5.4 Unrecognized authentication type"),
            (Some(AuthMechanism::Plain), None) => {
                self.auth_step = AuthStep::Plain;
                Reply::new(334, "")
            }
            (Some(AuthMechanism::Plain), Some(response)) => self.finish_plain(response),
            (Some(AuthMechanism::Login), None) => {
                self.auth_step = AuthStep::LoginUser;
                Reply::new(334, LOGIN_USERNAME_CHALLENGE)
            }
            (Some(AuthMechanism::Login), Some(response)) => self.login_user(response),
        }
    }

    fn continue_auth(&mut self, line: &str) -> Reply {
        let step = std::mem::replace(&mut self.auth_step, AuthStep::Idle);
        if line.trim() == "*" {
            return Reply::new(501, "5.7.0 Authentication cancelled");
        }
        match step {
            AuthStep::Idle => Reply::new(503, "5.5.1 No authentication in progress"),
            AuthStep::Plain => self.finish_plain(line),
            AuthStep::LoginUser => self.login_user(line),
            AuthStep::LoginPassword(login) => match decode_base64(line) {
                Some(password) => self.verify(Credentials::new(login, password)),
                None => undecodable(),
            },
        }
    }

    fn finish_plain(&mut self, response: &str) -> Reply {
        // "=" is an explicitly empty initial response.
        let response = if response == "=" { "" } else { response };
        match Credentials::from_plain(response) {
            Some(credentials) => self.verify(credentials),
            None => undecodable(),
        }
    }

    fn login_user(&mut self, response: &str) -> Reply {
        match decode_base64(response) {
            Some(login) => {
                self.auth_step = AuthStep::LoginPassword(login);
                Reply::new(334, LOGIN_PASSWORD_CHALLENGE)
            }
            None => undecodable(),
        }
    }

    fn verify(&mut self, credentials: Credentials) -> Reply {
        let accepted = self
            .ctx
            .authenticator
            .as_ref()
            .is_some_and(|auth| auth.authenticate(&credentials));
        if accepted {
            info!(login = %credentials.login, "SMTP client authenticated");
            self.authenticated_as = Some(credentials.login);
            Reply::new(235, "2.7.0 Authentication successful")
        } else {
            warn!(login = %credentials.login, "SMTP authentication failed");
            Reply::new(535, "5.7.8 Authentication credentials invalid")
        }
    }
}

fn undecodable() -> Reply {
    Reply::new(501, "5.5.2 Cannot decode response")
}
