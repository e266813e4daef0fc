//! In-process document engine
//!
//! Databases are keyed by file path and outlive their connections until
//! `delete_files` removes them, so a dispose/reopen cycle behaves like a
//! file-backed engine. The engine counts opens and per-store operations and
//! can be told to fail, which is what the repository tests lean on.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{validate_name, Collection, Connection, ConnectionDescriptor, DocFilter, Document, IndexSpec, StorageEngine};
use crate::{Error, Result};

/// Operation counters for one database path
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OpStats {
    pub count: usize,
    pub find_all: usize,
    pub find_by_id: usize,
    pub find_one: usize,
    pub find: usize,
    pub upserts: usize,
    pub inserts: usize,
    pub deletes: usize,
    pub checkpoints: usize,
    pub drops: usize,
}

#[derive(Default)]
struct MemoryDatabase {
    key: Option<String>,
    collections: HashMap<String, BTreeMap<String, Document>>,
    indexes: HashMap<String, HashSet<IndexSpec>>,
    stats: OpStats,
}

type SharedDb = Arc<Mutex<MemoryDatabase>>;

#[derive(Default)]
struct Faults {
    failing_opens: usize,
    open_delay: Option<Duration>,
    corrupted: HashSet<PathBuf>,
}

#[derive(Default)]
pub struct MemoryEngine {
    databases: Mutex<HashMap<PathBuf, SharedDb>>,
    faults: Mutex<Faults>,
    open_attempts: AtomicUsize,
    deleted: Mutex<Vec<PathBuf>>,
    delete_requests: Mutex<Vec<PathBuf>>,
    fail_drop: Arc<AtomicBool>,
    fail_checkpoint: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total calls to `open`, failed ones included
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// Make the next `n` opens fail as if the file were unreadable
    pub fn fail_next_opens(&self, n: usize) {
        lock(&self.faults).failing_opens = n;
    }

    /// Mark a path as corrupted until its files are deleted
    pub fn corrupt(&self, path: impl Into<PathBuf>) {
        lock(&self.faults).corrupted.insert(path.into());
    }

    pub fn set_open_delay(&self, delay: Duration) {
        lock(&self.faults).open_delay = Some(delay);
    }

    pub fn fail_drop_collection(&self, fail: bool) {
        self.fail_drop.store(fail, Ordering::SeqCst);
    }

    pub fn fail_checkpoint(&self, fail: bool) {
        self.fail_checkpoint.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self, path: &Path) -> OpStats {
        lock(&self.databases)
            .get(path)
            .map(|db| lock(db).stats.clone())
            .unwrap_or_default()
    }

    pub fn exists(&self, path: &Path) -> bool {
        lock(&self.databases).contains_key(path)
    }

    /// Every path passed to `delete_files` that held a database
    pub fn deleted_paths(&self) -> Vec<PathBuf> {
        lock(&self.deleted).clone()
    }

    /// Every path passed to `delete_files`, whether or not anything was there
    pub fn delete_requests(&self) -> Vec<PathBuf> {
        lock(&self.delete_requests).clone()
    }

    pub fn indexes(&self, path: &Path, collection: &str) -> Vec<IndexSpec> {
        lock(&self.databases)
            .get(path)
            .and_then(|db| lock(db).indexes.get(collection).map(|set| set.iter().cloned().collect()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn Connection>> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = lock(&self.faults).open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut faults = lock(&self.faults);
            if faults.failing_opens > 0 {
                faults.failing_opens -= 1;
                return Err(Error::Engine(format!(
                    "simulated open failure: {}",
                    descriptor.path.display()
                )));
            }
            if faults.corrupted.contains(&descriptor.path) {
                return Err(Error::Engine(format!(
                    "file is not a database: {}",
                    descriptor.path.display()
                )));
            }
        }

        let db = {
            let mut databases = lock(&self.databases);
            let db = databases.entry(descriptor.path.clone()).or_insert_with(|| {
                Arc::new(Mutex::new(MemoryDatabase {
                    key: descriptor.key.clone(),
                    ..MemoryDatabase::default()
                }))
            });
            Arc::clone(db)
        };

        if lock(&db).key != descriptor.key {
            return Err(Error::InvalidKey(descriptor.path.display().to_string()));
        }

        Ok(Arc::new(MemoryConnection {
            label: descriptor.path.display().to_string(),
            db: Mutex::new(Some(db)),
            fail_drop: Arc::clone(&self.fail_drop),
            fail_checkpoint: Arc::clone(&self.fail_checkpoint),
        }))
    }

    async fn delete_files(&self, paths: &[PathBuf]) -> Result<()> {
        let mut databases = lock(&self.databases);
        let mut faults = lock(&self.faults);
        let mut deleted = lock(&self.deleted);
        lock(&self.delete_requests).extend(paths.iter().cloned());
        for path in paths {
            faults.corrupted.remove(path);
            if databases.remove(path).is_some() {
                deleted.push(path.clone());
            }
        }
        Ok(())
    }
}

struct MemoryConnection {
    label: String,
    db: Mutex<Option<SharedDb>>,
    fail_drop: Arc<AtomicBool>,
    fail_checkpoint: Arc<AtomicBool>,
}

impl MemoryConnection {
    fn db(&self) -> Result<SharedDb> {
        lock(&self.db)
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| Error::Disposed(self.label.clone()))
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>> {
        validate_name(name)?;
        let db = self.db()?;
        lock(&db).collections.entry(name.to_string()).or_default();
        Ok(Arc::new(MemoryCollection {
            name: name.to_string(),
            label: self.label.clone(),
            db: Arc::downgrade(&db),
        }))
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let db = self.db()?;
        let exists = lock(&db).collections.contains_key(name);
        Ok(exists)
    }

    async fn drop_collection(&self, name: &str) -> Result<bool> {
        let db = self.db()?;
        if self.fail_drop.load(Ordering::SeqCst) {
            return Err(Error::Engine(format!("simulated drop failure: {}", name)));
        }
        let mut db = lock(&db);
        db.stats.drops += 1;
        db.indexes.remove(name);
        Ok(db.collections.remove(name).is_some())
    }

    async fn checkpoint(&self) -> Result<()> {
        let db = self.db()?;
        if self.fail_checkpoint.load(Ordering::SeqCst) {
            return Err(Error::Engine("simulated checkpoint failure".to_string()));
        }
        lock(&db).stats.checkpoints += 1;
        Ok(())
    }

    fn dispose(&self) {
        lock(&self.db).take();
    }
}

/// Holds a weak reference so a deleted database invalidates its handles
struct MemoryCollection {
    name: String,
    label: String,
    db: std::sync::Weak<Mutex<MemoryDatabase>>,
}

impl MemoryCollection {
    fn with<R>(&self, f: impl FnOnce(&mut MemoryDatabase, &str) -> R) -> Result<R> {
        let db = self.db.upgrade().ok_or_else(|| Error::Disposed(self.label.clone()))?;
        let mut db = lock(&db);
        db.collections.entry(self.name.clone()).or_default();
        Ok(f(&mut db, &self.name))
    }
}

fn docs<'a>(db: &'a mut MemoryDatabase, name: &str) -> &'a mut BTreeMap<String, Document> {
    db.collections.entry(name.to_string()).or_default()
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self) -> Result<usize> {
        self.with(|db, name| {
            db.stats.count += 1;
            docs(db, name).len()
        })
    }

    async fn find_all(&self) -> Result<Vec<Document>> {
        self.with(|db, name| {
            db.stats.find_all += 1;
            docs(db, name).values().cloned().collect()
        })
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        self.with(|db, name| {
            db.stats.find_by_id += 1;
            docs(db, name).get(id).cloned()
        })
    }

    async fn find_one(&self, filter: &DocFilter<'_>) -> Result<Option<Document>> {
        self.with(|db, name| {
            db.stats.find_one += 1;
            docs(db, name).values().find(|doc| filter(doc)).cloned()
        })
    }

    async fn find(&self, filter: &DocFilter<'_>) -> Result<Vec<Document>> {
        self.with(|db, name| {
            db.stats.find += 1;
            docs(db, name).values().filter(|doc| filter(doc)).cloned().collect()
        })
    }

    async fn upsert(&self, doc: Document) -> Result<()> {
        self.with(|db, name| {
            db.stats.upserts += 1;
            docs(db, name).insert(doc.id.clone(), doc);
        })
    }

    async fn upsert_many(&self, batch: Vec<Document>) -> Result<usize> {
        self.with(|db, name| {
            db.stats.upserts += 1;
            let len = batch.len();
            let target = docs(db, name);
            for doc in batch {
                target.insert(doc.id.clone(), doc);
            }
            len
        })
    }

    async fn insert_many(&self, batch: Vec<Document>) -> Result<usize> {
        self.with(|db, name| {
            db.stats.inserts += 1;
            let target = docs(db, name);
            let mut seen = HashSet::new();
            for doc in &batch {
                if target.contains_key(&doc.id) || !seen.insert(doc.id.as_str()) {
                    return Err(Error::Engine(format!("duplicate id in {}: {}", name, doc.id)));
                }
            }
            let len = batch.len();
            for doc in batch {
                target.insert(doc.id.clone(), doc);
            }
            Ok(len)
        })?
    }

    async fn delete_all(&self) -> Result<usize> {
        self.with(|db, name| {
            db.stats.deletes += 1;
            let target = docs(db, name);
            let removed = target.len();
            target.clear();
            removed
        })
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        self.with(|db, name| {
            db.stats.deletes += 1;
            docs(db, name).remove(id).is_some()
        })
    }

    async fn delete_many(&self, filter: &DocFilter<'_>) -> Result<usize> {
        self.with(|db, name| {
            db.stats.deletes += 1;
            let target = docs(db, name);
            let before = target.len();
            target.retain(|_, doc| !filter(doc));
            before - target.len()
        })
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<()> {
        validate_name(&index.field)?;
        self.with(|db, name| {
            db.indexes.entry(name.to_string()).or_default().insert(index.clone());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(path: &str) -> ConnectionDescriptor {
        ConnectionDescriptor {
            path: PathBuf::from(path),
            log_path: PathBuf::from(format!("{}-log", path)),
            key: None,
            lock_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_data_survives_reopen_until_deleted() {
        let engine = MemoryEngine::new();
        let conn = engine.open(&descriptor("/mem/A.db")).await.unwrap();
        let coll = conn.collection("Items").await.unwrap();
        coll.upsert(Document::new("1", json!({"id": "1"}))).await.unwrap();
        conn.dispose();

        let conn = engine.open(&descriptor("/mem/A.db")).await.unwrap();
        assert_eq!(conn.collection("Items").await.unwrap().count().await.unwrap(), 1);

        engine.delete_files(&[PathBuf::from("/mem/A.db")]).await.unwrap();
        assert!(coll.count().await.is_err());
        assert_eq!(engine.deleted_paths(), vec![PathBuf::from("/mem/A.db")]);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let engine = MemoryEngine::new();
        engine.fail_next_opens(1);
        assert!(engine.open(&descriptor("/mem/B.db")).await.is_err());
        assert!(engine.open(&descriptor("/mem/B.db")).await.is_ok());
        assert_eq!(engine.open_attempts(), 2);

        engine.corrupt("/mem/B.db");
        assert!(engine.open(&descriptor("/mem/B.db")).await.is_err());
        engine.delete_files(&[PathBuf::from("/mem/B.db")]).await.unwrap();
        assert!(engine.open(&descriptor("/mem/B.db")).await.is_ok());
    }

    #[tokio::test]
    async fn test_insert_many_is_all_or_nothing() {
        let engine = MemoryEngine::new();
        let conn = engine.open(&descriptor("/mem/C.db")).await.unwrap();
        let coll = conn.collection("Items").await.unwrap();
        let batch = vec![
            Document::new("1", json!({"id": "1"})),
            Document::new("1", json!({"id": "1"})),
        ];
        assert!(coll.insert_many(batch).await.is_err());
        assert_eq!(coll.count().await.unwrap(), 0);
    }
}
