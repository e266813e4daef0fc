//! SQLite document engine
//!
//! One database file per connection, one table per collection. rusqlite is
//! blocking, so every statement runs on the blocking pool behind a mutex that
//! owns the connection until `dispose`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use super::schema;
use super::{validate_name, Collection, Connection, ConnectionDescriptor, DocFilter, Document, IndexSpec, StorageEngine};
use crate::{Error, Result};

type Shared = Arc<Mutex<Option<rusqlite::Connection>>>;

/// rusqlite-backed engine storing documents as JSON text
#[derive(Debug, Default, Clone)]
pub struct SqliteEngine;

impl SqliteEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageEngine for SqliteEngine {
    async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn Connection>> {
        let descriptor = descriptor.clone();
        let conn = tokio::task::spawn_blocking(move || open_blocking(&descriptor)).await??;
        Ok(Arc::new(conn))
    }

    fn sidecar_paths(&self, db_path: &Path) -> Vec<PathBuf> {
        ["-wal", "-shm", "-journal"]
            .iter()
            .map(|suffix| {
                let mut name = db_path.as_os_str().to_os_string();
                name.push(suffix);
                PathBuf::from(name)
            })
            .collect()
    }
}

fn open_blocking(descriptor: &ConnectionDescriptor) -> Result<SqliteConnection> {
    if let Some(parent) = descriptor.path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = rusqlite::Connection::open(&descriptor.path)?;
    conn.busy_timeout(descriptor.lock_timeout)?;
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute_batch(schema::CREATE_META_TABLE)?;
    verify_key(&conn, descriptor.key.as_deref(), &descriptor.path)?;

    Ok(SqliteConnection {
        label: descriptor.path.display().to_string(),
        inner: Arc::new(Mutex::new(Some(conn))),
    })
}

/// The key only gates access; contents are not encrypted.
fn verify_key(conn: &rusqlite::Connection, key: Option<&str>, path: &Path) -> Result<()> {
    let stored: Option<String> = conn
        .query_row(schema::SELECT_META, [schema::KEY_DIGEST], |row| row.get(0))
        .optional()?;
    let expected = key.map(|k| blake3::hash(k.as_bytes()).to_hex().to_string());

    match (stored, expected) {
        (None, None) => Ok(()),
        (None, Some(digest)) => {
            let user_tables: i64 = conn.query_row(schema::COUNT_USER_TABLES, [], |row| row.get(0))?;
            if user_tables > 0 {
                return Err(Error::InvalidKey(path.display().to_string()));
            }
            conn.execute(schema::UPSERT_META, params![schema::KEY_DIGEST, digest])?;
            Ok(())
        }
        (Some(stored), Some(expected)) if stored == expected => Ok(()),
        _ => Err(Error::InvalidKey(path.display().to_string())),
    }
}

async fn run_blocking<R, F>(inner: &Shared, label: &str, f: F) -> Result<R>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    let inner = Arc::clone(inner);
    let label = label.to_string();
    tokio::task::spawn_blocking(move || {
        let mut guard = inner
            .lock()
            .map_err(|_| Error::Engine(format!("connection lock poisoned: {}", label)))?;
        let conn = guard.as_mut().ok_or(Error::Disposed(label))?;
        f(conn)
    })
    .await?
}

struct SqliteConnection {
    label: String,
    inner: Shared,
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>> {
        validate_name(name)?;
        let sql = schema::create_collection_table(name);
        run_blocking(&self.inner, &self.label, move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await?;

        Ok(Arc::new(SqliteCollection {
            name: name.to_string(),
            label: self.label.clone(),
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        run_blocking(&self.inner, &self.label, move |conn| {
            let count: i64 = conn.query_row(schema::TABLE_EXISTS, [&name], |row| row.get(0))?;
            Ok(count > 0)
        })
        .await
    }

    async fn drop_collection(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let name = name.to_string();
        run_blocking(&self.inner, &self.label, move |conn| {
            let count: i64 = conn.query_row(schema::TABLE_EXISTS, [&name], |row| row.get(0))?;
            if count == 0 {
                return Ok(false);
            }
            conn.execute_batch(&schema::drop_collection_table(&name))?;
            Ok(true)
        })
        .await
    }

    async fn checkpoint(&self) -> Result<()> {
        run_blocking(&self.inner, &self.label, |conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    fn dispose(&self) {
        let taken = match self.inner.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(conn) = taken {
            if let Err((_, e)) = conn.close() {
                tracing::warn!("Failed to close {} cleanly: {}", self.label, e);
            }
        }
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct SqliteCollection {
    name: String,
    label: String,
    inner: Shared,
}

impl SqliteCollection {
    async fn run<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        run_blocking(&self.inner, &self.label, f).await
    }

    async fn load_all(&self) -> Result<Vec<Document>> {
        let sql = schema::select_all(&self.name);
        let rows: Vec<(String, String)> = self
            .run(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(|(id, body)| row_to_document(id, &body)).collect()
    }

    async fn write_many(&self, sql: String, docs: Vec<Document>) -> Result<usize> {
        let rows = encode_rows(&docs)?;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for (id, body) in &rows {
                    stmt.execute(params![id, body])?;
                }
            }
            tx.commit()?;
            Ok(rows.len())
        })
        .await
    }
}

fn row_to_document(id: String, body: &str) -> Result<Document> {
    Ok(Document { id, body: serde_json::from_str(body)? })
}

fn encode_rows(docs: &[Document]) -> Result<Vec<(String, String)>> {
    docs.iter()
        .map(|doc| Ok((doc.id.clone(), serde_json::to_string(&doc.body)?)))
        .collect()
}

#[async_trait]
impl Collection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self) -> Result<usize> {
        let sql = schema::count(&self.name);
        self.run(move |conn| {
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    async fn find_all(&self) -> Result<Vec<Document>> {
        self.load_all().await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        let sql = schema::select_by_id(&self.name);
        let id = id.to_string();
        let row: Option<(String, String)> = self
            .run(move |conn| {
                Ok(conn
                    .query_row(&sql, [&id], |row| Ok((row.get(0)?, row.get(1)?)))
                    .optional()?)
            })
            .await?;

        row.map(|(id, body)| row_to_document(id, &body)).transpose()
    }

    async fn find_one(&self, filter: &DocFilter<'_>) -> Result<Option<Document>> {
        Ok(self.load_all().await?.into_iter().find(|doc| filter(doc)))
    }

    async fn find(&self, filter: &DocFilter<'_>) -> Result<Vec<Document>> {
        Ok(self.load_all().await?.into_iter().filter(|doc| filter(doc)).collect())
    }

    async fn upsert(&self, doc: Document) -> Result<()> {
        self.write_many(schema::upsert(&self.name), vec![doc]).await?;
        Ok(())
    }

    async fn upsert_many(&self, docs: Vec<Document>) -> Result<usize> {
        self.write_many(schema::upsert(&self.name), docs).await
    }

    async fn insert_many(&self, docs: Vec<Document>) -> Result<usize> {
        self.write_many(schema::insert(&self.name), docs).await
    }

    async fn delete_all(&self) -> Result<usize> {
        let sql = schema::delete_all(&self.name);
        self.run(move |conn| Ok(conn.execute(&sql, [])?)).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let sql = schema::delete_by_id(&self.name);
        let id = id.to_string();
        self.run(move |conn| Ok(conn.execute(&sql, [&id])? > 0)).await
    }

    async fn delete_many(&self, filter: &DocFilter<'_>) -> Result<usize> {
        let ids: Vec<String> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|doc| filter(doc))
            .map(|doc| doc.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = schema::delete_by_id(&self.name);
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare(&sql)?;
                for id in &ids {
                    removed += stmt.execute([id])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<()> {
        validate_name(&index.field)?;
        let sql = schema::create_index(&self.name, &index.field, index.unique);
        self.run(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn descriptor(dir: &Path, name: &str, key: Option<&str>) -> ConnectionDescriptor {
        ConnectionDescriptor {
            path: dir.join(format!("{}.db", name)),
            log_path: dir.join(format!("{}-log.db", name)),
            key: key.map(str::to_string),
            lock_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_document_crud() {
        let dir = tempfile::tempdir().unwrap();
        let conn = SqliteEngine::new().open(&descriptor(dir.path(), "Crud", None)).await.unwrap();
        let coll = conn.collection("Orders").await.unwrap();

        coll.upsert(Document::new("b", json!({"id": "b", "qty": 2}))).await.unwrap();
        coll.upsert(Document::new("a", json!({"id": "a", "qty": 1}))).await.unwrap();
        coll.upsert(Document::new("a", json!({"id": "a", "qty": 5}))).await.unwrap();

        assert_eq!(coll.count().await.unwrap(), 2);
        let all = coll.find_all().await.unwrap();
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].body["qty"], 5);

        let big = coll.find(&|d: &Document| d.body["qty"].as_i64() > Some(1)).await.unwrap();
        assert_eq!(big.len(), 2);

        assert!(coll.delete_by_id("a").await.unwrap());
        assert!(coll.find_by_id("a").await.unwrap().is_none());
        assert!(!coll.delete_by_id("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_many_rejects_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let conn = SqliteEngine::new().open(&descriptor(dir.path(), "Dupes", None)).await.unwrap();
        let coll = conn.collection("Items").await.unwrap();

        let docs = vec![
            Document::new("x", json!({"id": "x"})),
            Document::new("x", json!({"id": "x", "n": 2})),
        ];
        assert!(coll.insert_many(docs).await.is_err());
        assert_eq!(coll.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_key_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SqliteEngine::new();

        let conn = engine.open(&descriptor(dir.path(), "Keyed", Some("secret"))).await.unwrap();
        conn.collection("Things").await.unwrap();
        conn.dispose();

        assert!(engine.open(&descriptor(dir.path(), "Keyed", Some("secret"))).await.is_ok());
        let err = engine
            .open(&descriptor(dir.path(), "Keyed", Some("other")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidKey(_)));
        assert!(engine.open(&descriptor(dir.path(), "Keyed", None)).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let desc = descriptor(dir.path(), "Broken", None);
        std::fs::write(&desc.path, vec![0x42u8; 8192]).unwrap();

        assert!(SqliteEngine::new().open(&desc).await.is_err());
    }

    #[tokio::test]
    async fn test_disposed_connection_errors() {
        let dir = tempfile::tempdir().unwrap();
        let conn = SqliteEngine::new().open(&descriptor(dir.path(), "Gone", None)).await.unwrap();
        let coll = conn.collection("Items").await.unwrap();
        conn.dispose();
        conn.dispose();

        assert!(matches!(coll.count().await, Err(Error::Disposed(_))));
    }

    #[tokio::test]
    async fn test_drop_collection_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let conn = SqliteEngine::new().open(&descriptor(dir.path(), "Drop", None)).await.unwrap();
        let coll = conn.collection("Items").await.unwrap();
        coll.ensure_index(&IndexSpec::on("name")).await.unwrap();
        coll.upsert(Document::new("1", json!({"id": "1", "name": "n"}))).await.unwrap();

        assert!(conn.collection_exists("Items").await.unwrap());
        assert!(conn.drop_collection("Items").await.unwrap());
        assert!(!conn.collection_exists("Items").await.unwrap());
        assert!(!conn.drop_collection("Items").await.unwrap());
        conn.checkpoint().await.unwrap();
    }

    #[test]
    fn test_sidecar_paths() {
        let paths = SqliteEngine::new().sidecar_paths(Path::new("/data/Inbox.db"));
        assert_eq!(paths[0], PathBuf::from("/data/Inbox.db-wal"));
        assert_eq!(paths.len(), 3);
    }
}
