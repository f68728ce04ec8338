//! Profile snapshot and the persistent store behind it.
//!
//! A snapshot is what lives in a `.dsu` profile file: identity, credential, contact list and
//! the flat message log. [`JsonProfileStore`] writes it atomically (temp file + fsync + rename)
//! while holding an exclusive `fs2` lock on a sidecar `.lock` file; reads take a shared lock,
//! so a reader never observes a half-written snapshot.

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::contacts::Contact;
use crate::conversation::Message;
use crate::error::{LoadError, SaveError};

/// Serialized form of a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "_users")]
    pub contacts: Vec<Contact>,
    #[serde(default, alias = "_messages")]
    pub messages: Vec<Message>,
    /// Keys written by other DSU clients (`bio`, `_posts`, `dsuserver`); carried through saves.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Load/save of profile snapshots by path.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self, path: &Path) -> Result<ProfileSnapshot, LoadError>;
    async fn save(&self, path: &Path, snapshot: &ProfileSnapshot) -> Result<(), SaveError>;
}

/// Pretty-printed JSON profile files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonProfileStore;

#[async_trait]
impl ProfileStore for JsonProfileStore {
    async fn load(&self, path: &Path) -> Result<ProfileSnapshot, LoadError> {
        let path = path.to_path_buf();
        let io_path = path.clone();
        tokio::task::spawn_blocking(move || load_blocking(&io_path))
            .await
            .map_err(|e| LoadError::Io {
                path,
                source: std::io::Error::other(e),
            })?
    }

    async fn save(&self, path: &Path, snapshot: &ProfileSnapshot) -> Result<(), SaveError> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let path = path.to_path_buf();
        let io_path = path.clone();
        tokio::task::spawn_blocking(move || save_blocking(&io_path, &json))
            .await
            .map_err(|e| SaveError::Io {
                path,
                source: std::io::Error::other(e),
            })?
    }
}

fn load_blocking(path: &Path) -> Result<ProfileSnapshot, LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    if !path.exists() {
        return Err(io_err(std::io::Error::from(std::io::ErrorKind::NotFound)));
    }
    let lock = lock_file(path).map_err(io_err)?;
    FileExt::lock_shared(&lock).map_err(io_err)?;
    let bytes = fs::read(path).map_err(io_err)?;
    let _ = FileExt::unlock(&lock);
    serde_json::from_slice(&bytes).map_err(|source| LoadError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

fn save_blocking(path: &Path, json: &[u8]) -> Result<(), SaveError> {
    let io_err = |source| SaveError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let lock = lock_file(path).map_err(io_err)?;
    FileExt::lock_exclusive(&lock).map_err(io_err)?;

    let tmp = temp_path(path);
    let written = (|| {
        let mut f = File::create(&tmp)?;
        f.write_all(json)?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp, path)
    })();
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    let _ = FileExt::unlock(&lock);
    written.map_err(io_err)
}

fn lock_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path(path))
}

/// Sidecar lock file next to the profile (`alice.dsu` -> `alice.dsu.lock`).
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_profile() -> PathBuf {
        std::env::temp_dir()
            .join(format!("dsu-profile-test-{}", uuid::Uuid::new_v4()))
            .join("alice.dsu")
    }

    #[tokio::test]
    async fn save_then_load_reproduces_snapshot() {
        let path = temp_profile();
        let snapshot = ProfileSnapshot {
            username: "alice".into(),
            password: "pw".into(),
            contacts: vec!["bob".into()],
            messages: vec![Message::new("bob", "alice", "hi", 1.5)],
            extra: serde_json::Map::new(),
        };
        JsonProfileStore.save(&path, &snapshot).await.unwrap();
        let loaded = JsonProfileStore.load(&path).await.unwrap();
        assert_eq!(loaded, snapshot);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = JsonProfileStore.load(&temp_profile()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn malformed_file_is_load_error() {
        let path = temp_profile();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();
        let err = JsonProfileStore.load(&path).await.unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn loads_legacy_profile_layout() {
        let path = temp_profile();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let legacy = r#"{
            "dsuserver": "127.0.0.1",
            "username": "alice",
            "password": "pw",
            "bio": "",
            "_posts": [],
            "_users": ["bob"],
            "_messages": [{"frm": "bob", "message": "hi", "timestamp": "12.5"}]
        }"#;
        std::fs::write(&path, legacy).unwrap();
        let loaded = JsonProfileStore.load(&path).await.unwrap();
        assert_eq!(loaded.contacts, vec!["bob".to_string()]);
        assert_eq!(loaded.messages[0].body, "hi");
        assert_eq!(loaded.messages[0].timestamp, 12.5);
        assert_eq!(loaded.extra["bio"], "");
        assert_eq!(loaded.extra["dsuserver"], "127.0.0.1");
        assert!(!loaded.extra.contains_key("_users"));

        JsonProfileStore.save(&path, &loaded).await.unwrap();
        let again = JsonProfileStore.load(&path).await.unwrap();
        assert_eq!(again, loaded);
        assert_eq!(again.extra["_posts"], serde_json::json!([]));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn lock_path_is_sidecar() {
        assert_eq!(
            lock_path(Path::new("/tmp/x/alice.dsu")),
            PathBuf::from("/tmp/x/alice.dsu.lock")
        );
    }
}
