//! Storage engine boundary
//!
//! The repositories only talk to an engine through these traits:
//! - `StorageEngine` opens connections and removes database files
//! - `Connection` hands out collections and runs checkpoint/drop
//! - `Collection` stores JSON `Document`s keyed by id
//!
//! Two engines ship with the crate: SQLite (`SqliteEngine`) and an
//! in-process one (`MemoryEngine`).

pub mod memory;
pub mod schema;
pub mod sqlite;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

pub use memory::{MemoryEngine, OpStats};
pub use sqlite::SqliteEngine;

/// Stored unit: id plus the full serialized entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub body: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        Self { id: id.into(), body }
    }
}

/// Engine-level predicate over stored documents
pub type DocFilter<'a> = dyn Fn(&Document) -> bool + Send + Sync + 'a;

/// Secondary index on a top-level body field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
    pub unique: bool,
}

impl IndexSpec {
    pub fn on(field: impl Into<String>) -> Self {
        Self { field: field.into(), unique: false }
    }

    pub fn unique(field: impl Into<String>) -> Self {
        Self { field: field.into(), unique: true }
    }
}

/// Everything an engine needs to open one database file
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    pub path: PathBuf,
    pub log_path: PathBuf,
    pub key: Option<String>,
    pub lock_timeout: Duration,
}

#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Open (creating if needed) the database described by `descriptor`
    async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn Connection>>;

    /// Engine-specific files living next to the main database file
    fn sidecar_paths(&self, _db_path: &Path) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Remove database files. Missing files are not an error.
    async fn delete_files(&self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!("Deleted {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Collection handle; only valid until the connection is disposed
    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>>;

    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Returns whether a collection was actually dropped
    async fn drop_collection(&self, name: &str) -> Result<bool>;

    /// Flush the journal into the main file
    async fn checkpoint(&self) -> Result<()>;

    /// Release the underlying connection. Idempotent.
    fn dispose(&self);
}

#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn count(&self) -> Result<usize>;
    async fn find_all(&self) -> Result<Vec<Document>>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Document>>;
    async fn find_one(&self, filter: &DocFilter<'_>) -> Result<Option<Document>>;
    async fn find(&self, filter: &DocFilter<'_>) -> Result<Vec<Document>>;

    /// Insert or replace by id
    async fn upsert(&self, doc: Document) -> Result<()>;
    async fn upsert_many(&self, docs: Vec<Document>) -> Result<usize>;
    /// Plain insert of every document; a duplicate id fails the batch
    async fn insert_many(&self, docs: Vec<Document>) -> Result<usize>;

    async fn delete_all(&self) -> Result<usize>;
    async fn delete_by_id(&self, id: &str) -> Result<bool>;
    async fn delete_many(&self, filter: &DocFilter<'_>) -> Result<usize>;

    async fn ensure_index(&self, index: &IndexSpec) -> Result<()>;
}

/// Collection and index names end up in SQL identifiers.
///
/// `__` is reserved as the separator in generated index names.
pub fn validate_name(name: &str) -> Result<()> {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,127}$").expect("static regex")
    });
    if re.is_match(name) && !name.contains("__") {
        Ok(())
    } else {
        Err(Error::InvalidCollectionName(name.to_string()))
    }
}
