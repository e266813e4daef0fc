//! Repositories - typed CRUD over one or two stores
//!
//! - `Repository<T>`: one store, one collection
//! - `OutboxRepository<T>`: an inbox (synced baseline) plus an outbox
//!   (pending local writes); reads prefer the outbox
//!
//! Both share a `ReadyGate` that opens their stores and provisions indexes
//! before the first operation.

pub mod gate;
pub mod outbox;
pub mod single;

use async_trait::async_trait;

use crate::collection::Predicate;
use crate::entity::Entity;
use crate::Result;

pub use gate::{CollectionSpec, ReadyGate};
pub use outbox::OutboxRepository;
pub use single::Repository;

/// CRUD capability common to both repository variants.
///
/// `None` passed to `upsert`/`upsert_all` is a no-op and does not open
/// any store.
#[async_trait]
pub trait DocumentRepository<T: Entity>: Send + Sync {
    /// Open stores and provision indexes now instead of on first use
    async fn initialize(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;
    async fn get_all(&self) -> Result<Vec<T>>;
    async fn get_by_id(&self, id: &str) -> Result<Option<T>>;
    async fn find(&self, predicate: &Predicate<'_, T>) -> Result<Option<T>>;
    async fn query(&self, predicate: &Predicate<'_, T>) -> Result<Vec<T>>;

    async fn upsert(&self, item: Option<&T>) -> Result<()>;
    /// With `drop_existing` the collection is cleared and `items` inserted as given
    async fn upsert_all(&self, items: Option<&[T]>, drop_existing: bool) -> Result<()>;

    async fn delete_by_id(&self, id: &str) -> Result<bool>;
    async fn delete_where(&self, predicate: &Predicate<'_, T>) -> Result<usize>;

    async fn drop_collection(&self) -> Result<()>;
}

/// Operations only the dual-store repository has
#[async_trait]
pub trait OutboxOps<T: Entity>: DocumentRepository<T> {
    /// Stage a pending local change
    async fn update_item(&self, item: &T) -> Result<()>;

    async fn drop_outbox_collection(&self) -> Result<()>;
}
