use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::{SqliteEngine, StorageEngine};
use crate::providers::{FixedFolder, FolderPathProvider, KeySupplier, NoKey};
use crate::store::StoreHandle;

/// Engine plus host collaborators, shared by every store of an application
#[derive(Clone)]
pub struct StoreContext {
    pub engine: Arc<dyn StorageEngine>,
    pub folders: Arc<dyn FolderPathProvider>,
    pub keys: Arc<dyn KeySupplier>,
}

impl StoreContext {
    pub fn new(engine: Arc<dyn StorageEngine>, folders: Arc<dyn FolderPathProvider>) -> Self {
        Self {
            engine,
            folders,
            keys: Arc::new(NoKey),
        }
    }

    /// SQLite files under `folder`, no key
    pub fn sqlite(folder: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(SqliteEngine::new()), Arc::new(FixedFolder::new(folder)))
    }

    pub fn with_keys(mut self, keys: Arc<dyn KeySupplier>) -> Self {
        self.keys = keys;
        self
    }

    /// Shorthand for a default-configured handle in this context
    pub fn store(&self, name: impl Into<String>) -> Arc<StoreHandle> {
        Arc::new(StoreHandle::new(name, self.clone()))
    }
}
