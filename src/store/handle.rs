use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::collection::TypedCollection;
use crate::engine::{Connection, ConnectionDescriptor};
use crate::entity::Entity;
use crate::mapper::FieldMapper;
use crate::store::StoreContext;
use crate::{Error, Result};

/// How long an engine operation waits on a locked file before failing
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(90);

/// Probed right after open to force the engine to validate the file
pub const SENTINEL_COLLECTION: &str = "testdbkey";

/// Managed connection to one physical database file.
///
/// State moves `Closed -> Open` on a successful open and back to `Closed` on
/// dispose, reset or teardown. Openers serialize on `init_lock`; readers of an
/// open handle never take it.
pub struct StoreHandle {
    name: String,
    context: StoreContext,
    lock_timeout: Duration,
    mapper: RwLock<FieldMapper>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    generation: AtomicU64,
    init_lock: Mutex<()>,
}

impl StoreHandle {
    pub fn new(name: impl Into<String>, context: StoreContext) -> Self {
        Self {
            name: name.into(),
            context,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            mapper: RwLock::new(FieldMapper::default()),
            connection: RwLock::new(None),
            generation: AtomicU64::new(0),
            init_lock: Mutex::new(()),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_mapper(self, mapper: FieldMapper) -> Self {
        self.configure_mapper(|current| *current = mapper);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn db_file_name(&self) -> String {
        format!("{}.db", self.name)
    }

    pub fn log_file_name(&self) -> String {
        format!("{}-log.db", self.name)
    }

    pub fn db_path(&self) -> PathBuf {
        self.context.folders.database_folder().join(self.db_file_name())
    }

    pub fn log_path(&self) -> PathBuf {
        self.context.folders.database_folder().join(self.log_file_name())
    }

    pub fn is_open(&self) -> bool {
        self.current().is_some()
    }

    /// Bumped by every successful open
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn mapper(&self) -> FieldMapper {
        self.mapper
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn configure_mapper(&self, configure: impl FnOnce(&mut FieldMapper)) {
        let mut mapper = self
            .mapper
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        configure(&mut mapper);
    }

    /// Open the store if it is not open yet
    pub async fn initialize(&self) -> Result<()> {
        self.ensure_open().await.map(|_| ())
    }

    /// The open connection, opening the store first when needed
    pub async fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.ensure_open().await
    }

    pub async fn collection<T: Entity>(&self, name: &str) -> Result<TypedCollection<T>> {
        let conn = self.ensure_open().await?;
        let raw = conn.collection(name).await?;
        Ok(TypedCollection::new(raw, self.mapper()))
    }

    /// Drop a collection and compact. Engine failures are logged, not returned.
    pub async fn drop_collection(&self, name: &str) -> Result<()> {
        let conn = self.ensure_open().await?;

        match conn.drop_collection(name).await {
            Ok(dropped) => {
                tracing::debug!("Dropped collection {} in {} (existed: {})", name, self.name, dropped);
            }
            Err(e) => {
                tracing::error!("Failed to drop collection {} in {}: {}", name, self.name, e);
                return Ok(());
            }
        }

        if let Err(e) = conn.checkpoint().await {
            tracing::error!("Failed to compact {} after dropping {}: {}", self.name, name, e);
        }
        Ok(())
    }

    /// Flush, release the connection and delete the journal file.
    ///
    /// A failed checkpoint still deletes the journal. The handle can be
    /// reopened lazily afterwards.
    pub async fn checkpoint_and_delete(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;

        if let Some(conn) = self.take_connection() {
            tracing::info!("Checkpointing {}", self.name);
            if let Err(e) = conn.checkpoint().await {
                tracing::error!("Checkpoint of {} failed: {}", self.name, e);
            }
            conn.dispose();
        }

        self.context.engine.delete_files(&[self.log_path()]).await
    }

    /// Dispose, delete every file of the store and open a fresh one
    pub async fn reinitialize_collections(&self) -> Result<()> {
        let guard = self.init_lock.lock().await;
        self.dispose();
        self.reset_files().await?;
        self.open_with_recovery(&guard).await?;
        Ok(())
    }

    /// Delete the database, journal and engine sidecar files.
    ///
    /// Does not touch an open connection; dispose first.
    pub async fn reset_database(&self) -> Result<()> {
        self.reset_files().await
    }

    /// Release the connection. Safe to call any number of times.
    pub fn dispose(&self) {
        if let Some(conn) = self.take_connection() {
            conn.dispose();
            tracing::debug!("Disposed {}", self.name);
        }
    }

    fn current(&self) -> Option<Arc<dyn Connection>> {
        self.connection
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn take_connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    async fn ensure_open(&self) -> Result<Arc<dyn Connection>> {
        if let Some(conn) = self.current() {
            return Ok(conn);
        }

        let guard = self.init_lock.lock().await;
        if let Some(conn) = self.current() {
            return Ok(conn);
        }

        self.open_with_recovery(&guard).await
    }

    /// Caller must hold `init_lock`; the guard is only taken as proof.
    ///
    /// Key supplier failures are returned as-is: no reset, no retry, and they
    /// are never wrapped in `StoreCorruption`.
    async fn open_with_recovery(&self, _guard: &MutexGuard<'_, ()>) -> Result<Arc<dyn Connection>> {
        tracing::debug!("Initializing store {}", self.name);
        tracing::debug!("Database path: {}", self.db_path().display());

        let first = match self.try_open().await {
            Ok(conn) => return Ok(self.install(conn)),
            Err(e @ Error::KeySupplier(_)) => return Err(e),
            Err(e) => e,
        };

        tracing::warn!("Failed to open {}, recreating it: {}", self.name, first);
        self.reset_files().await?;

        match self.try_open().await {
            Ok(conn) => Ok(self.install(conn)),
            Err(e @ Error::KeySupplier(_)) => Err(e),
            Err(e) => {
                tracing::error!("Failed to open {} after recreating it: {}", self.name, e);
                Err(Error::StoreCorruption {
                    store: self.name.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn try_open(&self) -> Result<Arc<dyn Connection>> {
        let key = self.context.keys.database_key().await.map_err(|e| match e {
            Error::KeySupplier(msg) => Error::KeySupplier(msg),
            other => Error::KeySupplier(other.to_string()),
        })?;

        let descriptor = ConnectionDescriptor {
            path: self.db_path(),
            log_path: self.log_path(),
            key,
            lock_timeout: self.lock_timeout,
        };

        let conn = self.context.engine.open(&descriptor).await?;
        if let Err(e) = conn.collection_exists(SENTINEL_COLLECTION).await {
            conn.dispose();
            return Err(e);
        }
        Ok(conn)
    }

    fn install(&self, conn: Arc<dyn Connection>) -> Arc<dyn Connection> {
        *self
            .connection
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::clone(&conn));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!("Opened {} (generation {})", self.name, generation);
        conn
    }

    async fn reset_files(&self) -> Result<()> {
        let db_path = self.db_path();
        let mut paths = vec![self.log_path()];
        paths.extend(self.context.engine.sidecar_paths(&db_path));
        paths.push(db_path);
        self.context.engine.delete_files(&paths).await
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::providers::{FixedFolder, StaticKey};
    use std::path::Path;

    fn memory_store(engine: &Arc<MemoryEngine>, name: &str) -> StoreHandle {
        let context = StoreContext::new(engine.clone(), Arc::new(FixedFolder::new("/mem")));
        StoreHandle::new(name, context)
    }

    #[test]
    fn test_database_paths() {
        let context = StoreContext::sqlite("DatabaseFolderPath");
        let store = StoreHandle::new("TestBaseDb", context);
        assert_eq!(store.db_path(), Path::new("DatabaseFolderPath").join("TestBaseDb.db"));
        assert_eq!(store.log_path(), Path::new("DatabaseFolderPath").join("TestBaseDb-log.db"));
        assert_eq!(store.lock_timeout(), DEFAULT_LOCK_TIMEOUT);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_opens_once() {
        let engine = Arc::new(MemoryEngine::new());
        engine.set_open_delay(Duration::from_millis(20));
        let store = Arc::new(memory_store(&engine, "Inbox"));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.initialize().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(engine.open_attempts(), 1);
        assert_eq!(store.generation(), 1);
        assert!(store.is_open());
    }

    #[tokio::test]
    async fn test_recovers_once_from_failed_open() {
        let engine = Arc::new(MemoryEngine::new());
        let store = memory_store(&engine, "Inbox");
        engine.fail_next_opens(1);

        store.initialize().await.unwrap();

        assert!(store.is_open());
        assert_eq!(engine.open_attempts(), 2);
    }

    #[tokio::test]
    async fn test_second_failure_is_corruption() {
        let engine = Arc::new(MemoryEngine::new());
        let store = memory_store(&engine, "Inbox");
        engine.fail_next_opens(2);

        let err = store.initialize().await.unwrap_err();
        assert!(err.is_corruption());
        assert!(!store.is_open());
        assert_eq!(engine.open_attempts(), 2);
    }

    #[tokio::test]
    async fn test_corrupted_file_is_deleted_and_recreated() {
        let engine = Arc::new(MemoryEngine::new());
        let store = memory_store(&engine, "Inbox");
        store.initialize().await.unwrap();
        store.dispose();

        engine.corrupt(store.db_path());
        store.initialize().await.unwrap();

        assert!(engine.deleted_paths().contains(&store.db_path()));
        assert_eq!(store.generation(), 2);
    }

    #[tokio::test]
    async fn test_key_supplier_failure_does_not_delete() {
        let engine = Arc::new(MemoryEngine::new());
        let keyed = StoreContext::new(engine.clone(), Arc::new(FixedFolder::new("/mem")))
            .with_keys(Arc::new(crate::providers::EnvKey::new("DOCREPO_UNSET_KEY_VAR").required()));
        let store = StoreHandle::new("Inbox", keyed);

        let err = store.initialize().await.unwrap_err();
        assert!(matches!(err, Error::KeySupplier(_)));
        assert_eq!(engine.open_attempts(), 0);
        assert!(engine.deleted_paths().is_empty());
        assert!(engine.delete_requests().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_key_recreates_store() {
        let engine = Arc::new(MemoryEngine::new());
        let folder = Arc::new(FixedFolder::new("/mem"));
        let first = StoreHandle::new(
            "Inbox",
            StoreContext::new(engine.clone(), folder.clone()).with_keys(Arc::new(StaticKey::new("a"))),
        );
        first.initialize().await.unwrap();
        first.dispose();

        let second = StoreHandle::new(
            "Inbox",
            StoreContext::new(engine.clone(), folder).with_keys(Arc::new(StaticKey::new("b"))),
        );
        second.initialize().await.unwrap();
        assert_eq!(engine.deleted_paths(), vec![second.db_path()]);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_reopens_lazily() {
        let engine = Arc::new(MemoryEngine::new());
        let store = memory_store(&engine, "Inbox");
        store.initialize().await.unwrap();

        store.dispose();
        store.dispose();
        assert!(!store.is_open());

        store.connection().await.unwrap();
        assert_eq!(engine.open_attempts(), 2);
        assert_eq!(store.generation(), 2);
    }

    #[tokio::test]
    async fn test_drop_collection_failure_is_swallowed() {
        let engine = Arc::new(MemoryEngine::new());
        let store = memory_store(&engine, "Inbox");
        store.initialize().await.unwrap();
        engine.fail_drop_collection(true);

        store.drop_collection("Items").await.unwrap();
        assert_eq!(engine.stats(&store.db_path()).drops, 0);
    }

    #[tokio::test]
    async fn test_checkpoint_and_delete() {
        let engine = Arc::new(MemoryEngine::new());
        let store = memory_store(&engine, "Inbox");
        store.initialize().await.unwrap();

        store.checkpoint_and_delete().await.unwrap();

        assert!(!store.is_open());
        assert_eq!(engine.stats(&store.db_path()).checkpoints, 1);
        assert!(engine.exists(&store.db_path()));
    }

    #[tokio::test]
    async fn test_failed_checkpoint_still_deletes_log() {
        let engine = Arc::new(MemoryEngine::new());
        let store = memory_store(&engine, "Inbox");
        store.initialize().await.unwrap();
        engine.fail_checkpoint(true);

        store.checkpoint_and_delete().await.unwrap();

        assert!(!store.is_open());
        assert_eq!(engine.delete_requests(), vec![store.log_path()]);
        assert!(engine.exists(&store.db_path()));

        engine.fail_checkpoint(false);
        store.initialize().await.unwrap();
        assert!(store.is_open());
    }

    #[tokio::test]
    async fn test_reinitialize_wipes_data() {
        let engine = Arc::new(MemoryEngine::new());
        let store = memory_store(&engine, "Inbox");
        let conn = store.connection().await.unwrap();
        conn.collection("Items").await.unwrap();

        store.reinitialize_collections().await.unwrap();

        assert!(store.is_open());
        assert_eq!(store.generation(), 2);
        let conn = store.connection().await.unwrap();
        assert!(!conn.collection_exists("Items").await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_store_recovers_from_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreHandle::new("Garbage", StoreContext::sqlite(dir.path()));
        std::fs::write(store.db_path(), vec![0x17u8; 4096]).unwrap();

        store.initialize().await.unwrap();
        assert!(store.is_open());
        assert!(store.connection().await.unwrap().collection_exists("Items").await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_database_after_dispose() {
        let engine = Arc::new(MemoryEngine::new());
        let mapper = FieldMapper { trim_whitespace: true, ..FieldMapper::default() };
        let store = memory_store(&engine, "Inbox").with_mapper(mapper.clone());
        assert_eq!(store.mapper(), mapper);

        store.initialize().await.unwrap();
        store.dispose();
        store.reset_database().await.unwrap();

        assert!(!engine.exists(&store.db_path()));
        assert_eq!(engine.deleted_paths(), vec![store.db_path()]);

        store.initialize().await.unwrap();
        assert_eq!(store.generation(), 2);
    }
}
