//! Initialize the configuration directory: create ~/.dsu, a default config, and the profiles directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the `profiles` subdirectory if missing.
///
/// Returns the profiles directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let profiles = config::profiles_dir(config_path);
    if !profiles.exists() {
        std::fs::create_dir_all(&profiles)
            .with_context(|| format!("creating profiles directory {}", profiles.display()))?;
        log::info!("created profiles directory at {}", profiles.display());
    } else {
        log::debug!("profiles directory already exists at {}, skipping", profiles.display());
    }

    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_config_and_profiles_once() {
        let dir = std::env::temp_dir().join(format!("dsu-init-test-{}", uuid::Uuid::new_v4()));
        let config_path = dir.join("config.json");

        let profiles = init_config_dir(&config_path).unwrap();
        assert_eq!(profiles, dir.join("profiles"));
        assert!(profiles.is_dir());
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "{}");

        std::fs::write(&config_path, r#"{"sync":{"intervalMs":50}}"#).unwrap();
        init_config_dir(&config_path).unwrap();
        let (config, _) = config::load_config(Some(config_path.clone())).unwrap();
        assert_eq!(config.sync.interval_ms, 50);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
