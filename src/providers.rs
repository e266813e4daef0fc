//! Collaborators a store handle needs from its host: where database files
//! live, and the secret used to open them.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::{Error, Result};

/// Base directory for database files
pub trait FolderPathProvider: Send + Sync {
    fn database_folder(&self) -> PathBuf;
}

/// Supplies the secret used to open an encrypted store file.
#[async_trait]
pub trait KeySupplier: Send + Sync {
    /// `None` opens the store without a key
    async fn database_key(&self) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct FixedFolder(pub PathBuf);

impl FixedFolder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }
}

impl FolderPathProvider for FixedFolder {
    fn database_folder(&self) -> PathBuf {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoKey;

#[async_trait]
impl KeySupplier for NoKey {
    async fn database_key(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Clone)]
pub struct StaticKey(String);

impl StaticKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl std::fmt::Debug for StaticKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticKey(***)")
    }
}

#[async_trait]
impl KeySupplier for StaticKey {
    async fn database_key(&self) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

/// Reads the key from an environment variable on every open
#[derive(Debug, Clone)]
pub struct EnvKey {
    var: String,
    required: bool,
}

impl EnvKey {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into(), required: false }
    }

    /// Fail instead of opening unkeyed when the variable is unset
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[async_trait]
impl KeySupplier for EnvKey {
    async fn database_key(&self) -> Result<Option<String>> {
        match std::env::var(&self.var) {
            Ok(value) if !value.is_empty() => Ok(Some(value)),
            _ if self.required => Err(Error::KeySupplier(format!("{} is not set", self.var))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_and_empty_keys() {
        assert_eq!(StaticKey::new("k").database_key().await.unwrap(), Some("k".to_string()));
        assert_eq!(NoKey.database_key().await.unwrap(), None);
        assert_eq!(format!("{:?}", StaticKey::new("k")), "StaticKey(***)");
    }

    #[tokio::test]
    async fn test_env_key_required() {
        let supplier = EnvKey::new("DOCREPO_TEST_KEY_THAT_IS_NEVER_SET").required();
        assert!(matches!(supplier.database_key().await, Err(Error::KeySupplier(_))));

        let optional = EnvKey::new("DOCREPO_TEST_KEY_THAT_IS_NEVER_SET");
        assert_eq!(optional.database_key().await.unwrap(), None);
    }
}
