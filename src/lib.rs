//! # Docrepo - typed repositories over an embedded document store
//!
//! Docrepo provides:
//! - Managed store handles with lazy open, one-shot corruption recovery,
//!   checkpointing and deterministic disposal
//! - A single-store `Repository<T>` for plain typed CRUD
//! - A dual-store `OutboxRepository<T>` that keeps pending local writes
//!   (outbox) apart from the synced baseline (inbox) and merges them on read
//! - A SQLite-backed JSON document engine and an in-process engine

pub mod engine;
pub mod store;
pub mod repository;
pub mod entity;
pub mod identity;
pub mod mapper;
pub mod collection;
pub mod providers;
pub mod config;
pub mod ui;


// Re-exports for convenient access
pub use entity::Entity;
pub use identity::{DefaultIdentity, IdentityComparer};
pub use mapper::FieldMapper;
pub use engine::{Document, IndexSpec, MemoryEngine, SqliteEngine, StorageEngine};
pub use providers::{EnvKey, FixedFolder, FolderPathProvider, KeySupplier, NoKey, StaticKey};
pub use store::{StoreContext, StoreHandle};
pub use repository::{CollectionSpec, DocumentRepository, OutboxOps, OutboxRepository, Repository};

/// Result type alias for Docrepo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Docrepo operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store {store} could not be opened after recovery: {source}")]
    StoreCorruption {
        store: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid key for store: {0}")]
    InvalidKey(String),

    #[error("Key supplier failed: {0}")]
    KeySupplier(String),

    #[error("Invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("Document has no id")]
    MissingId,

    #[error("Connection disposed: {0}")]
    Disposed(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// True when the error came out of the open/recovery sequence of a store.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::StoreCorruption { .. })
    }
}
