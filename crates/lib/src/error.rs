//! Error taxonomy for profile persistence, transport, and the messenger facade.
//!
//! Load/save failures on user commands are surfaced to the caller; retrieve and
//! save failures inside a sync tick are logged by the sync loop and never bubble up.

use std::path::PathBuf;
use std::time::Duration;

/// Profile file missing, unreadable, or malformed.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("reading profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing profile {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// True when the file simply does not exist yet (a fresh profile that was never saved).
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// I/O or serialization failure while persisting a profile.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("writing profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing profile: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure talking to the messaging server.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connecting to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed server response: {0}")]
    Protocol(String),
    #[error("server rejected request: {0}")]
    Rejected(String),
}

/// A message could not be delivered; nothing was recorded locally.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("recipient must not be empty")]
    EmptyRecipient,
    #[error("delivery failed: {0}")]
    Transport(#[from] TransportError),
}

/// Retrieval of new messages failed. Transient inside the sync loop.
#[derive(Debug, thiserror::Error)]
#[error("retrieving messages: {0}")]
pub struct RetrieveError(#[from] pub TransportError);

/// Errors surfaced by [`crate::client::Messenger`] commands.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no profile is open")]
    NoProfile,
    #[error("no contact is selected")]
    NoSelection,
    #[error("unknown contact: {0}")]
    UnknownContact(String),
    #[error("unknown selection token: {0}")]
    UnknownToken(String),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Save(#[from] SaveError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
}
