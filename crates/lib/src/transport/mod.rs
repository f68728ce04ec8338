//! Messaging transport: deliver a message to a named recipient and fetch messages that
//! arrived since the last retrieval.
//!
//! The core only depends on the [`Transport`] trait; [`DspTransport`] is the TCP client for
//! the Distributed Social Protocol server.

mod dsp;

use async_trait::async_trait;

use crate::conversation::Message;
use crate::error::TransportError;

pub use dsp::DspTransport;

/// Account used when a profile is created with blank credentials.
pub const DEFAULT_USERNAME: &str = "dusername123";
pub const DEFAULT_PASSWORD: &str = "dpassword123";

/// Username and password presented to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Trimmed credentials; blank fields fall back to the default account.
    pub fn or_defaults(self) -> Self {
        let pick = |s: String, default: &str| {
            let t = s.trim();
            if t.is_empty() {
                default.to_string()
            } else {
                t.to_string()
            }
        };
        Self {
            username: pick(self.username, DEFAULT_USERNAME),
            password: pick(self.password, DEFAULT_PASSWORD),
        }
    }
}

/// Remote messaging endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `message` (sender is the credential owner) to `message.recipient`.
    async fn send(&self, credentials: &Credentials, message: &Message) -> Result<(), TransportError>;

    /// Messages not yet delivered to this client, in server order. Once returned they are
    /// considered delivered and will not be returned again.
    async fn retrieve_new(&self, credentials: &Credentials) -> Result<Vec<Message>, TransportError>;

    /// Every message the server holds for this account.
    async fn retrieve_all(&self, credentials: &Credentials) -> Result<Vec<Message>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_credentials_fall_back_to_defaults() {
        let c = Credentials::new("  ", "").or_defaults();
        assert_eq!(c.username, DEFAULT_USERNAME);
        assert_eq!(c.password, DEFAULT_PASSWORD);
        let c = Credentials::new(" alice ", "pw").or_defaults();
        assert_eq!(c, Credentials::new("alice", "pw"));
    }
}
