//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.dsu/config.json`) and environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Messaging server address and timeout.
    #[serde(default)]
    pub server: ServerConfig,

    /// Background sync settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Default profile file.
    #[serde(default)]
    pub profile: ProfileConfig,
}

/// DSP server address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Host name or IP (default "127.0.0.1"). Overridden by DSU_SERVER env.
    #[serde(default = "default_server_host")]
    pub host: String,

    /// TCP port (default 3021).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Upper bound for one request/response exchange, in milliseconds (default 5000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Period between sync ticks in milliseconds (default 1000).
    #[serde(default = "default_sync_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConfig {
    /// Profile opened when no path is given on the command line. Relative paths are resolved against the config file's parent.
    pub path: Option<PathBuf>,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    3021
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_sync_interval_ms() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sync_interval_ms(),
        }
    }
}

impl SyncConfig {
    /// Tick period; never zero.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Apply DSU_SERVER ("host" or "host:port") over the configured server address.
pub fn apply_server_env(config: &mut Config) {
    let Some(raw) = std::env::var("DSU_SERVER")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    else {
        return;
    };
    apply_server_override(&mut config.server, &raw);
}

fn apply_server_override(server: &mut ServerConfig, raw: &str) {
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => match port.parse() {
            Ok(p) => {
                server.host = host.to_string();
                server.port = p;
            }
            Err(_) => log::warn!("ignoring DSU_SERVER with invalid port: {}", raw),
        },
        _ => server.host = raw.to_string(),
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("DSU_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".dsu").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Directory holding profiles created by `init`: `profiles` next to the config file.
pub fn profiles_dir(config_path: &Path) -> PathBuf {
    config_dir(config_path).join("profiles")
}

fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the default profile path, if configured.
pub fn resolve_profile_path(config: &Config, config_path: &Path) -> Option<PathBuf> {
    match &config.profile.path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                Some(p.clone())
            } else {
                Some(config_dir(config_path).join(p))
            }
        }
        _ => None,
    }
}

/// Load config from the given path (or the default path). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    apply_server_env(&mut config);
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.server.host, "127.0.0.1");
        assert_eq!(c.server.port, 3021);
        assert_eq!(c.sync.interval(), Duration::from_millis(1000));
        assert!(c.profile.path.is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: Config = serde_json::from_str(r#"{"server":{"port":4000},"sync":{"intervalMs":250}}"#).unwrap();
        assert_eq!(c.server.host, "127.0.0.1");
        assert_eq!(c.server.port, 4000);
        assert_eq!(c.server.timeout_ms, 5000);
        assert_eq!(c.sync.interval_ms, 250);
    }

    #[test]
    fn server_override_host_and_port() {
        let mut s = ServerConfig::default();
        apply_server_override(&mut s, "example.org:4040");
        assert_eq!(s.host, "example.org");
        assert_eq!(s.port, 4040);
        apply_server_override(&mut s, "other.org");
        assert_eq!(s.host, "other.org");
        assert_eq!(s.port, 4040);
    }

    #[test]
    fn resolve_profile_path_relative() {
        let mut config = Config::default();
        config.profile.path = Some(PathBuf::from("profiles/alice.dsu"));
        let path = Path::new("/home/user/.dsu/config.json");
        assert_eq!(
            resolve_profile_path(&config, path),
            Some(PathBuf::from("/home/user/.dsu/profiles/alice.dsu"))
        );
    }

    #[test]
    fn resolve_profile_path_unset() {
        let config = Config::default();
        assert_eq!(resolve_profile_path(&config, Path::new("/x/config.json")), None);
    }
}
