//! DSU messenger core: contacts, conversations, profile persistence and background sync,
//! shared by the CLI and any other front end.

pub mod client;
pub mod config;
pub mod contacts;
pub mod conversation;
pub mod error;
pub mod init;
pub mod profile;
pub mod selection;
pub mod session;
pub mod sync;
pub mod transport;

pub use client::Messenger;
pub use contacts::{Contact, ContactDirectory};
pub use conversation::{ConversationStore, Message, MessageKey};
pub use error::{ClientError, LoadError, RetrieveError, SaveError, SendError, TransportError};
pub use profile::{JsonProfileStore, ProfileSnapshot, ProfileStore};
pub use session::ProfileSession;
pub use sync::{RefreshCallback, SyncLoop, SyncState};
pub use transport::{Credentials, DspTransport, Transport};
