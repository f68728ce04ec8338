//! Presentation-facing facade: one active profile session plus its sync loop.
//!
//! Commands (open, create, close, add contact, select, send) mutate the active session and
//! persist immediately. Opening or creating a profile builds the new session completely
//! before the old one is touched, so a failed open leaves the previous profile live.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::contacts::Contact;
use crate::conversation::Message;
use crate::error::ClientError;
use crate::profile::{JsonProfileStore, ProfileStore};
use crate::selection::SelectionTable;
use crate::session::ProfileSession;
use crate::sync::{
    self, Fetch, RefreshCallback, SyncError, SyncLoop, SyncState, TickReport, DEFAULT_SYNC_PERIOD,
};
use crate::transport::{Credentials, DspTransport, Transport};

struct Active {
    session: Arc<ProfileSession>,
    sync: SyncLoop,
}

/// Client core driven by a presentation layer.
pub struct Messenger {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ProfileStore>,
    sync_period: Duration,
    auto_sync: bool,
    refresh: Option<RefreshCallback>,
    active: Mutex<Option<Active>>,
    rows: RwLock<SelectionTable>,
}

impl Messenger {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn ProfileStore>) -> Self {
        Self {
            transport,
            store,
            sync_period: DEFAULT_SYNC_PERIOD,
            auto_sync: true,
            refresh: None,
            active: Mutex::new(None),
            rows: RwLock::new(SelectionTable::new()),
        }
    }

    /// DSP transport and JSON profile files as configured.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(DspTransport::from_config(&config.server)),
            Arc::new(JsonProfileStore),
        )
        .with_sync_period(config.sync.interval())
    }

    pub fn with_sync_period(mut self, period: Duration) -> Self {
        self.sync_period = period;
        self
    }

    /// Whether open/create start the sync loop (default true).
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    /// Callback invoked by the sync loop with the selected conversation after each tick.
    pub fn with_refresh(mut self, refresh: RefreshCallback) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Open an existing profile. On failure the current profile (if any) stays active.
    pub async fn open(&self, path: impl Into<PathBuf>) -> Result<(), ClientError> {
        let session = ProfileSession::open(path, self.store.clone()).await?;
        self.activate(session).await;
        Ok(())
    }

    /// Create and persist a new profile. Blank credentials fall back to the default account.
    pub async fn create(
        &self,
        path: impl Into<PathBuf>,
        username: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        let path = path.into();
        let credentials = Credentials::new(username, password).or_defaults();
        let session = ProfileSession::create(path.clone(), credentials, self.store.clone());
        session.save_to(&path).await?;
        log::info!("created profile {}", path.display());
        self.activate(session).await;
        Ok(())
    }

    /// Stop the sync loop and drop the active session.
    pub async fn close(&self) {
        let mut active = self.active.lock().await;
        if let Some(old) = active.take() {
            old.sync.stop().await;
            log::info!("closed profile {}", old.session.path().display());
        }
        self.rows.write().await.clear();
    }

    async fn activate(&self, session: ProfileSession) {
        let session = Arc::new(session);
        let sync = SyncLoop::new(self.transport.clone(), self.sync_period, self.refresh.clone());
        let mut active = self.active.lock().await;
        if let Some(old) = active.take() {
            old.sync.stop().await;
            log::info!("closed profile {}", old.session.path().display());
        }
        self.rows.write().await.clear();
        if self.auto_sync {
            sync.start(session.clone());
        }
        *active = Some(Active { session, sync });
    }

    async fn session(&self) -> Result<Arc<ProfileSession>, ClientError> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.session.clone())
            .ok_or(ClientError::NoProfile)
    }

    pub async fn is_open(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.session.path().to_path_buf())
    }

    pub async fn username(&self) -> Result<String, ClientError> {
        Ok(self.session().await?.username().await)
    }

    pub async fn contacts(&self) -> Result<Vec<Contact>, ClientError> {
        Ok(self.session().await?.contacts().await)
    }

    /// Contacts paired with the row tokens handed to the list widget. Repopulates the selection table.
    pub async fn contact_entries(&self) -> Result<Vec<(String, Contact)>, ClientError> {
        let contacts = self.contacts().await?;
        Ok(self.rows.write().await.populate(&contacts))
    }

    pub async fn history(&self, contact: &str) -> Result<Vec<Message>, ClientError> {
        Ok(self.session().await?.history(contact).await)
    }

    pub async fn selected(&self) -> Result<Option<Contact>, ClientError> {
        Ok(self.session().await?.selected().await)
    }

    /// Select a contact and return its history.
    pub async fn select(&self, contact: &str) -> Result<Vec<Message>, ClientError> {
        let session = self.session().await?;
        if !session.select(contact).await {
            return Err(ClientError::UnknownContact(contact.to_string()));
        }
        Ok(session.history(contact).await)
    }

    /// Select the contact behind a list row token.
    pub async fn select_token(&self, token: &str) -> Result<(Contact, Vec<Message>), ClientError> {
        let session = self.session().await?;
        let directory = session.directory().await;
        let contact = self
            .rows
            .read()
            .await
            .resolve(token, &directory)
            .ok_or_else(|| ClientError::UnknownToken(token.to_string()))?;
        let history = self.select(&contact).await?;
        Ok((contact, history))
    }

    /// Add a contact and persist when it is new. Returns whether it was added.
    pub async fn add_contact(&self, username: &str) -> Result<bool, ClientError> {
        let session = self.session().await?;
        let added = session.add_contact(username).await;
        if added {
            session.save().await?;
            log::info!("added contact {}", username.trim());
        }
        Ok(added)
    }

    /// Send `body` to the selected contact.
    pub async fn send(&self, body: &str) -> Result<Message, ClientError> {
        let session = self.session().await?;
        let to = session.selected().await.ok_or(ClientError::NoSelection)?;
        self.send_to(&to, body).await
    }

    /// Send `body` to `contact` and persist. Nothing is recorded when delivery fails.
    pub async fn send_to(&self, contact: &str, body: &str) -> Result<Message, ClientError> {
        let session = self.session().await?;
        let message = session.send(self.transport.as_ref(), body, contact).await?;
        session.save().await?;
        Ok(message)
    }

    /// Run one sync tick now, outside the timer.
    pub async fn sync_now(&self) -> Result<TickReport, ClientError> {
        self.reconcile(Fetch::New).await
    }

    /// Pull the full server-side history and merge it.
    pub async fn resync(&self) -> Result<TickReport, ClientError> {
        self.reconcile(Fetch::All).await
    }

    async fn reconcile(&self, fetch: Fetch) -> Result<TickReport, ClientError> {
        let session = self.session().await?;
        Ok(sync::reconcile(&session, self.transport.as_ref(), fetch, self.refresh.as_ref()).await?)
    }

    pub async fn start_sync(&self) -> Result<(), ClientError> {
        let active = self.active.lock().await;
        let active = active.as_ref().ok_or(ClientError::NoProfile)?;
        active.sync.start(active.session.clone());
        Ok(())
    }

    pub async fn stop_sync(&self) {
        if let Some(active) = self.active.lock().await.as_ref() {
            active.sync.stop().await;
        }
    }

    pub async fn sync_state(&self) -> SyncState {
        match self.active.lock().await.as_ref() {
            Some(a) => a.sync.state(),
            None => SyncState::Idle,
        }
    }

    /// Save the active profile under another path; the session stays bound to its own file.
    pub async fn save_copy(&self, path: &Path) -> Result<(), ClientError> {
        Ok(self.session().await?.save_to(path).await?)
    }
}

impl From<SyncError> for ClientError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Retrieve(e) => ClientError::Retrieve(e),
            SyncError::Save(e) => ClientError::Save(e),
        }
    }
}
