//! Test doubles shared by the integration tests: a scripted in-memory transport and a
//! profile store whose saves can be made to fail.

#![allow(dead_code)]

use async_trait::async_trait;
use lib::{
    Credentials, JsonProfileStore, LoadError, Message, ProfileSnapshot, ProfileStore, SaveError,
    Transport, TransportError,
};
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Transport whose retrievals replay scripted batches; an empty script yields empty batches.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Result<Vec<Message>, String>>>,
    all: Mutex<Vec<Message>>,
    sent: Mutex<Vec<Message>>,
    fail_send: AtomicBool,
    retrieve_calls: AtomicUsize,
}

impl FakeTransport {
    pub fn push_batch(&self, batch: Vec<Message>) {
        self.script.lock().unwrap().push_back(Ok(batch));
    }

    pub fn push_failure(&self, reason: &str) {
        self.script.lock().unwrap().push_back(Err(reason.to_string()));
    }

    pub fn set_server_history(&self, messages: Vec<Message>) {
        *self.all.lock().unwrap() = messages;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, _credentials: &Credentials, message: &Message) -> Result<(), TransportError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("recipient unreachable".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn retrieve_new(&self, _credentials: &Credentials) -> Result<Vec<Message>, TransportError> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            None => Ok(Vec::new()),
            Some(Ok(batch)) => Ok(batch),
            Some(Err(reason)) => Err(TransportError::Rejected(reason)),
        }
    }

    async fn retrieve_all(&self, _credentials: &Credentials) -> Result<Vec<Message>, TransportError> {
        Ok(self.all.lock().unwrap().clone())
    }
}

/// Transport whose `retrieve_new` signals `entered`, then parks until `release` fires and
/// returns its batch.
pub struct GatedTransport {
    batch: Vec<Message>,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedTransport {
    pub fn new(batch: Vec<Message>) -> Self {
        Self {
            batch,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, _credentials: &Credentials, _message: &Message) -> Result<(), TransportError> {
        Ok(())
    }

    async fn retrieve_new(&self, _credentials: &Credentials) -> Result<Vec<Message>, TransportError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.batch.clone())
    }

    async fn retrieve_all(&self, credentials: &Credentials) -> Result<Vec<Message>, TransportError> {
        self.retrieve_new(credentials).await
    }
}

/// JSON store that can be told to fail saves.
#[derive(Default)]
pub struct FlakyStore {
    inner: JsonProfileStore,
    fail_save: AtomicBool,
}

impl FlakyStore {
    pub fn fail_saves(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfileStore for FlakyStore {
    async fn load(&self, path: &Path) -> Result<ProfileSnapshot, LoadError> {
        self.inner.load(path).await
    }

    async fn save(&self, path: &Path, snapshot: &ProfileSnapshot) -> Result<(), SaveError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(SaveError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.save(path, snapshot).await
    }
}

/// Fresh profile path in its own temp directory.
pub fn temp_profile(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dsu-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir.join(name)
}

pub fn incoming(from: &str, body: &str, ts: f64) -> Message {
    Message::new(from, "alice", body, ts)
}

/// Poll `check` every 10ms for up to 3s.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
