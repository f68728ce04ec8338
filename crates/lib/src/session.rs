//! Profile session: the live in-memory aggregate bound to one profile file.
//!
//! Holds identity, contact directory, conversations, the flat message log and the current
//! selection behind a tokio `RwLock`, so user commands and sync ticks never observe a
//! half-applied mutation. A separate mutex guards the profile file: every load-modify-save
//! sequence against the bound path runs while holding it.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::contacts::{Contact, ContactDirectory};
use crate::conversation::{ConversationStore, Message};
use crate::error::{LoadError, SaveError, SendError};
use crate::profile::{ProfileSnapshot, ProfileStore};
use crate::transport::{Credentials, Transport};

/// Mutable state of a session.
#[derive(Debug, Clone)]
struct SessionState {
    credentials: Credentials,
    contacts: ContactDirectory,
    conversations: ConversationStore,
    /// Every stored message in the order it was recorded; this is what gets persisted.
    log: Vec<Message>,
    selected: Option<Contact>,
    /// Profile keys this client does not interpret (`bio`, `_posts`, `dsuserver`, ...).
    extra: Map<String, Value>,
}

impl SessionState {
    fn empty(credentials: Credentials) -> Self {
        Self {
            credentials,
            contacts: ContactDirectory::new(),
            conversations: ConversationStore::new(),
            log: Vec::new(),
            selected: None,
            extra: Map::new(),
        }
    }

    fn from_snapshot(snapshot: ProfileSnapshot) -> Self {
        let mut state = Self::empty(Credentials::new(snapshot.username, snapshot.password));
        state.extra = snapshot.extra;
        state.absorb(snapshot.contacts, snapshot.messages);
        state
    }

    fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            username: self.credentials.username.clone(),
            password: self.credentials.password.clone(),
            contacts: self.contacts.list(),
            messages: self.log.clone(),
            extra: self.extra.clone(),
        }
    }

    /// Fill in a missing recipient and find the conversation a message belongs to.
    fn normalize(&self, mut message: Message) -> Option<(Contact, Message)> {
        let owner = &self.credentials.username;
        if !message.timestamp.is_finite() {
            log::warn!("dropping message from {} with timestamp {}", message.sender, message.timestamp);
            return None;
        }
        if message.recipient.is_empty() {
            message.recipient = owner.clone();
        }
        let counterpart = message.counterpart(owner).to_string();
        if counterpart.is_empty() {
            log::debug!("dropping message without counterpart: {:?}", message);
            return None;
        }
        Some((counterpart, message))
    }

    /// Store messages under their counterparts and append the new ones to the log, keeping
    /// arrival order. Returns the messages that were not stored before.
    fn record_batch(&mut self, messages: Vec<Message>) -> Vec<Message> {
        let mut batches: Vec<(Contact, Vec<Message>)> = Vec::new();
        let mut arrival = Vec::with_capacity(messages.len());
        for message in messages {
            let Some((counterpart, message)) = self.normalize(message) else { continue };
            if counterpart != self.credentials.username {
                self.contacts.add(counterpart.clone());
            }
            match batches.iter_mut().find(|(c, _)| *c == counterpart) {
                Some((_, batch)) => batch.push(message.clone()),
                None => batches.push((counterpart, vec![message.clone()])),
            }
            arrival.push(message);
        }

        let mut fresh = HashSet::new();
        for (counterpart, batch) in batches {
            for m in self.conversations.merge_batch(&counterpart, batch) {
                fresh.insert(m.key());
            }
        }
        let added: Vec<Message> = arrival.into_iter().filter(|m| fresh.remove(&m.key())).collect();
        self.log.extend(added.iter().cloned());
        added
    }

    /// Single-message [`record_batch`](Self::record_batch). False if already stored.
    fn record(&mut self, message: Message) -> bool {
        !self.record_batch(vec![message]).is_empty()
    }

    /// Union contacts and messages into this state. Returns how many messages were new.
    fn absorb(&mut self, contacts: Vec<Contact>, messages: Vec<Message>) -> usize {
        for c in contacts {
            let c = c.trim().to_string();
            if !c.is_empty() && c != self.credentials.username {
                self.contacts.add(c);
            }
        }
        self.record_batch(messages).len()
    }
}

/// One open profile.
pub struct ProfileSession {
    path: PathBuf,
    store: Arc<dyn ProfileStore>,
    state: RwLock<SessionState>,
    file_lock: Mutex<()>,
}

impl ProfileSession {
    /// Load a profile from `path`.
    pub async fn open(path: impl Into<PathBuf>, store: Arc<dyn ProfileStore>) -> Result<Self, LoadError> {
        let path = path.into();
        let snapshot = store.load(&path).await?;
        let state = SessionState::from_snapshot(snapshot);
        log::info!(
            "opened profile {} ({} contact(s), {} message(s))",
            path.display(),
            state.contacts.len(),
            state.log.len()
        );
        Ok(Self::with_state(path, store, state))
    }

    /// New, empty profile bound to `path`. Nothing is written until the first save.
    pub fn create(path: impl Into<PathBuf>, credentials: Credentials, store: Arc<dyn ProfileStore>) -> Self {
        Self::with_state(path.into(), store, SessionState::empty(credentials))
    }

    fn with_state(path: PathBuf, store: Arc<dyn ProfileStore>, state: SessionState) -> Self {
        Self {
            path,
            store,
            state: RwLock::new(state),
            file_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn credentials(&self) -> Credentials {
        self.state.read().await.credentials.clone()
    }

    pub async fn username(&self) -> String {
        self.state.read().await.credentials.username.clone()
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.state.read().await.contacts.list()
    }

    pub async fn directory(&self) -> ContactDirectory {
        self.state.read().await.contacts.clone()
    }

    pub async fn history(&self, contact: &str) -> Vec<Message> {
        self.state.read().await.conversations.history(contact)
    }

    pub async fn selected(&self) -> Option<Contact> {
        self.state.read().await.selected.clone()
    }

    /// Select a known contact. Returns false (selection unchanged) when the contact is unknown.
    pub async fn select(&self, contact: &str) -> bool {
        let mut state = self.state.write().await;
        if !state.contacts.contains(contact) {
            return false;
        }
        state.selected = Some(contact.to_string());
        true
    }

    pub async fn clear_selection(&self) {
        self.state.write().await.selected = None;
    }

    /// Add a contact. Returns true when it was not known before; the caller persists.
    pub async fn add_contact(&self, username: &str) -> bool {
        let username = username.trim();
        if username.is_empty() {
            return false;
        }
        self.state.write().await.contacts.add(username)
    }

    /// Deliver `body` to `to` and, only once the transport accepted it, record it locally.
    pub async fn send(&self, transport: &dyn Transport, body: &str, to: &str) -> Result<Message, SendError> {
        let to = to.trim();
        if to.is_empty() {
            return Err(SendError::EmptyRecipient);
        }
        let credentials = self.credentials().await;
        let message = Message::new(credentials.username.clone(), to, body, Message::now_timestamp());
        transport.send(&credentials, &message).await?;
        self.state.write().await.record(message.clone());
        Ok(message)
    }

    /// Record messages in order, skipping ones already stored. Returns the newly stored ones.
    pub async fn merge_incoming(&self, messages: Vec<Message>) -> Vec<Message> {
        self.state.write().await.record_batch(messages)
    }

    pub async fn snapshot(&self) -> ProfileSnapshot {
        self.state.read().await.snapshot()
    }

    /// Persist to the bound file: reload what is on disk, union it into memory, then write.
    /// Afterwards the file and the in-memory state are identical.
    pub async fn save(&self) -> Result<(), SaveError> {
        let _file = self.lock_file().await;
        if let Some(disk) = self.load_disk().await {
            self.absorb_snapshot(disk).await;
        }
        self.persist_locked().await
    }

    /// Write the in-memory state to `path` as-is.
    pub async fn save_to(&self, path: &Path) -> Result<(), SaveError> {
        let _file = self.lock_file().await;
        let snapshot = self.snapshot().await;
        self.store.save(path, &snapshot).await
    }

    pub(crate) async fn lock_file(&self) -> MutexGuard<'_, ()> {
        self.file_lock.lock().await
    }

    /// Current snapshot of the bound file. Missing file is silent; other failures are logged.
    pub(crate) async fn load_disk(&self) -> Option<ProfileSnapshot> {
        match self.store.load(&self.path).await {
            Ok(s) => Some(s),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                log::warn!("reload of {} failed, keeping in-memory state: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Union a snapshot's contacts, messages and unknown keys into memory. Identity is never
    /// taken from disk.
    pub(crate) async fn absorb_snapshot(&self, snapshot: ProfileSnapshot) -> usize {
        let mut state = self.state.write().await;
        for (key, value) in snapshot.extra {
            state.extra.insert(key, value);
        }
        state.absorb(snapshot.contacts, snapshot.messages)
    }

    /// Write the current state to the bound file. Caller holds the file lock.
    pub(crate) async fn persist_locked(&self) -> Result<(), SaveError> {
        let snapshot = self.snapshot().await;
        self.store.save(&self.path, &snapshot).await
    }
}
