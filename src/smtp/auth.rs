//! SMTP AUTH: SASL PLAIN and LOGIN against a pluggable credential check.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};

/// `334` challenge for the LOGIN username, base64 of `Username:`.
pub const LOGIN_USERNAME_CHALLENGE: &str = "VXNlcm5hbWU6";
/// `334` challenge for the LOGIN password, base64 of `Password:`.
pub const LOGIN_PASSWORD_CHALLENGE: &str = "UGFzc3dvcmQ6";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    Plain,
    Login,
}

impl AuthMechanism {
    pub fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else if token.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }
}

/// A login/password pair presented by a client.
#[derive(Debug)]
pub struct Credentials {
    pub login: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Decode a SASL PLAIN response: `authzid NUL authcid NUL passwd`.
    pub fn from_plain(response: &str) -> Option<Self> {
        let decoded = decode_base64(response)?;
        let mut fields = decoded.splitn(3, '\0');
        let _authzid = fields.next()?;
        let login = fields.next()?;
        let password = fields.next()?;
        Some(Self::new(login, password))
    }
}

/// Base64-decode a client response into UTF-8.
pub fn decode_base64(response: &str) -> Option<String> {
    let bytes = STANDARD.decode(response.trim()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Decides whether presented credentials are valid.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> bool;
}

/// Static login table loaded from configuration.
pub struct BasicAuthenticator {
    logins: HashMap<String, SecretString>,
}

impl BasicAuthenticator {
    pub fn new(logins: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            logins: logins
                .into_iter()
                .map(|(login, password)| (login, SecretString::from(password)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.logins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logins.is_empty()
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, credentials: &Credentials) -> bool {
        self.logins.get(&credentials.login).is_some_and(|expected| {
            expected.expose_secret() == credentials.password.expose_secret()
        })
    }
}

impl std::fmt::Debug for BasicAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthenticator")
            .field("logins", &self.logins.keys().collect::<Vec<_>>())
            .finish()
    }
}
