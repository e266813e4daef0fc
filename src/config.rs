use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::DEFAULT_LOCK_TIMEOUT;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocrepoConfig {
    /// Folder holding the store files
    pub database_dir: Option<String>,
    pub lock_timeout_secs: Option<u64>,
    /// Environment variable the store key is read from
    pub key_env: Option<String>,
    pub collection: Option<String>,
}

impl DocrepoConfig {
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LOCK_TIMEOUT)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("docrepo.toml")
}

pub fn default_database_dir_in(base: &Path) -> PathBuf {
    base.join(".docrepo")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<DocrepoConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: DocrepoConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &DocrepoConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(dir: &Path) -> anyhow::Result<()> {
    if !dir.as_os_str().is_empty() && !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
