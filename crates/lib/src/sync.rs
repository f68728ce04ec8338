//! Background sync: periodically pull new messages from the transport into a profile session.
//!
//! Each tick is one transaction under the session's file lock: reload the profile file (so
//! writes by other processes are observed), retrieve new messages, merge them, persist, and
//! hand the selected conversation to the refresh callback. Failures are logged and the loop
//! keeps running.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::conversation::Message;
use crate::error::{RetrieveError, SaveError};
use crate::session::ProfileSession;
use crate::transport::Transport;

/// Called with the selected contact and its full history after a sync tick.
pub type RefreshCallback = Arc<dyn Fn(&str, &[Message]) + Send + Sync>;

/// Default period between ticks.
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_millis(1000);

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
    #[error("persisting synced profile: {0}")]
    Save(#[from] SaveError),
}

/// Which server-side messages a reconciliation pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// Only messages not yet delivered to this client.
    New,
    /// Everything the server holds for the account.
    All,
}

/// Result of one successful tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub retrieved: usize,
    pub added: usize,
}

/// Reload, retrieve, merge, persist, refresh. On retrieval failure nothing in memory or on
/// disk changes. When the persist step fails the merged messages stay in memory and are
/// written by the next successful save.
pub async fn reconcile(
    session: &ProfileSession,
    transport: &dyn Transport,
    fetch: Fetch,
    refresh: Option<&RefreshCallback>,
) -> Result<TickReport, SyncError> {
    let report = {
        let _file = session.lock_file().await;
        let disk = session.load_disk().await;
        let credentials = session.credentials().await;
        let retrieved = match fetch {
            Fetch::New => transport.retrieve_new(&credentials).await,
            Fetch::All => transport.retrieve_all(&credentials).await,
        }
        .map_err(RetrieveError::from)?;

        if let Some(disk) = disk {
            session.absorb_snapshot(disk).await;
        }
        let report = TickReport {
            retrieved: retrieved.len(),
            added: session.merge_incoming(retrieved).await.len(),
        };
        session.persist_locked().await?;
        report
    };

    if let (Some(refresh), Some(contact)) = (refresh, session.selected().await) {
        let history = session.history(&contact).await;
        refresh(&contact, &history);
    }
    Ok(report)
}

/// One sync tick: reconcile with newly arrived messages.
pub async fn tick(
    session: &ProfileSession,
    transport: &dyn Transport,
    refresh: Option<&RefreshCallback>,
) -> Result<TickReport, SyncError> {
    reconcile(session, transport, Fetch::New, refresh).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Scheduled,
}

struct Running {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Repeating, cancellable sync task for one session at a time.
pub struct SyncLoop {
    transport: Arc<dyn Transport>,
    period: Duration,
    refresh: Option<RefreshCallback>,
    running: Mutex<Option<Running>>,
}

impl SyncLoop {
    pub fn new(transport: Arc<dyn Transport>, period: Duration, refresh: Option<RefreshCallback>) -> Self {
        Self {
            transport,
            period: period.max(Duration::from_millis(1)),
            refresh,
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SyncState {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.as_ref() {
            Some(r) if !r.handle.is_finished() => SyncState::Scheduled,
            _ => SyncState::Idle,
        }
    }

    /// Arm the recurring tick for `session`; the first tick fires one period from now.
    /// No-op when already scheduled. Must be called inside a tokio runtime.
    pub fn start(&self, session: Arc<ProfileSession>) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }
        let (cancel, cancelled) = watch::channel(false);
        let transport = self.transport.clone();
        let refresh = self.refresh.clone();
        let period = self.period;
        log::info!(
            "sync loop: starting for {} every {:?}",
            session.path().display(),
            period
        );
        let handle = tokio::spawn(run_sync_loop(session, transport, refresh, period, cancelled));
        *running = Some(Running { cancel, handle });
    }

    /// Cancel the pending tick and wait for an in-flight tick to finish. No tick runs after this returns.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            return;
        };
        let _ = running.cancel.send(true);
        if let Err(e) = running.handle.await {
            log::warn!("sync loop task ended abnormally: {}", e);
        }
    }
}

impl Drop for SyncLoop {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            let _ = running.cancel.send(true);
        }
    }
}

async fn run_sync_loop(
    session: Arc<ProfileSession>,
    transport: Arc<dyn Transport>,
    refresh: Option<RefreshCallback>,
    period: Duration,
    mut cancelled: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancelled.changed() => break,
            _ = ticker.tick() => {}
        }
        match tick(&session, transport.as_ref(), refresh.as_ref()).await {
            Ok(report) if report.added > 0 => {
                log::info!("sync: {} new message(s)", report.added);
            }
            Ok(report) => {
                log::debug!("sync: tick ok, {} retrieved, nothing new", report.retrieved);
            }
            Err(e) => {
                log::warn!("sync tick failed: {}", e);
            }
        }
    }
    log::info!("sync loop: stopped for {}", session.path().display());
}
