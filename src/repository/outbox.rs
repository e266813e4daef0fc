//! Inbox/outbox repository
//!
//! The inbox holds the last synced state, the outbox holds local changes
//! not yet pushed. Reads merge both with the outbox taking precedence.
//! Writes from sync go to the inbox, local edits go to the outbox through
//! `update_item`, and deletes hit both.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use super::gate::{CollectionSpec, ReadyGate};
use super::{DocumentRepository, OutboxOps};
use crate::collection::{Predicate, TypedCollection};
use crate::entity::{short_type_name, Entity};
use crate::identity::{union_by_identity, DefaultIdentity, IdentityComparer};
use crate::store::StoreHandle;
use crate::Result;

pub struct OutboxRepository<T> {
    inbox: Arc<StoreHandle>,
    outbox: Arc<StoreHandle>,
    comparer: Arc<dyn IdentityComparer<T>>,
    gate: ReadyGate,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> OutboxRepository<T> {
    pub fn new(inbox: Arc<StoreHandle>, outbox: Arc<StoreHandle>) -> Self {
        Self::with_spec(inbox, outbox, CollectionSpec::for_entity::<T>())
    }

    pub fn with_spec(inbox: Arc<StoreHandle>, outbox: Arc<StoreHandle>, spec: CollectionSpec) -> Self {
        let label = format!(
            "OutboxRepository<{}> on {}/{}",
            short_type_name::<T>(),
            inbox.name(),
            outbox.name()
        );
        Self {
            gate: ReadyGate::new(label, spec, vec![Arc::clone(&inbox), Arc::clone(&outbox)]),
            inbox,
            outbox,
            comparer: Arc::new(DefaultIdentity),
            _marker: PhantomData,
        }
    }

    /// Replace the identity used to merge inbox and outbox results
    pub fn with_comparer(mut self, comparer: Arc<dyn IdentityComparer<T>>) -> Self {
        self.comparer = comparer;
        self
    }

    pub fn inbox(&self) -> &Arc<StoreHandle> {
        &self.inbox
    }

    pub fn outbox(&self) -> &Arc<StoreHandle> {
        &self.outbox
    }

    pub fn collection_name(&self) -> &str {
        &self.gate.spec().name
    }

    /// Items in the merged view, each logical entity counted once
    pub async fn count_distinct(&self) -> Result<usize> {
        Ok(self.get_all().await?.len())
    }

    /// Local changes waiting to be pushed
    pub async fn get_pending(&self) -> Result<Vec<T>> {
        self.outbox_collection().await?.find_all().await
    }

    /// The last synced state, ignoring pending changes
    pub async fn get_synced(&self) -> Result<Vec<T>> {
        self.inbox_collection().await?.find_all().await
    }

    async fn inbox_collection(&self) -> Result<TypedCollection<T>> {
        self.gate.ensure_ready().await?;
        self.inbox.collection(self.collection_name()).await
    }

    async fn outbox_collection(&self) -> Result<TypedCollection<T>> {
        self.gate.ensure_ready().await?;
        self.outbox.collection(self.collection_name()).await
    }

    async fn both(&self) -> Result<(TypedCollection<T>, TypedCollection<T>)> {
        self.gate.ensure_ready().await?;
        let name = self.collection_name();
        tokio::try_join!(self.inbox.collection(name), self.outbox.collection(name))
    }

    fn merge(&self, outbox: Vec<T>, inbox: Vec<T>) -> Vec<T> {
        union_by_identity(outbox, inbox, self.comparer.as_ref())
    }
}

#[async_trait]
impl<T: Entity> DocumentRepository<T> for OutboxRepository<T> {
    async fn initialize(&self) -> Result<()> {
        self.gate.ensure_ready().await
    }

    /// Raw sum of both stores; an entity present in each counts twice.
    /// See `count_distinct` for the merged count.
    async fn count(&self) -> Result<usize> {
        let (inbox, outbox) = self.both().await?;
        let (a, b) = tokio::try_join!(inbox.count(), outbox.count())?;
        Ok(a + b)
    }

    async fn get_all(&self) -> Result<Vec<T>> {
        let (inbox, outbox) = self.both().await?;
        let (synced, pending) = tokio::try_join!(inbox.find_all(), outbox.find_all())?;
        Ok(self.merge(pending, synced))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<T>> {
        let (inbox, outbox) = self.both().await?;
        if let Some(item) = outbox.find_by_id(id).await? {
            return Ok(Some(item));
        }
        inbox.find_by_id(id).await
    }

    async fn find(&self, predicate: &Predicate<'_, T>) -> Result<Option<T>> {
        let (inbox, outbox) = self.both().await?;
        if let Some(item) = outbox.find_one(predicate).await? {
            return Ok(Some(item));
        }
        inbox.find_one(predicate).await
    }

    async fn query(&self, predicate: &Predicate<'_, T>) -> Result<Vec<T>> {
        let (inbox, outbox) = self.both().await?;
        let (synced, pending) = tokio::try_join!(inbox.find(predicate), outbox.find(predicate))?;
        Ok(self.merge(pending, synced))
    }

    async fn upsert(&self, item: Option<&T>) -> Result<()> {
        let Some(item) = item else {
            return Ok(());
        };
        self.inbox_collection().await?.upsert(item).await
    }

    async fn upsert_all(&self, items: Option<&[T]>, drop_existing: bool) -> Result<()> {
        let Some(items) = items else {
            return Ok(());
        };

        let inbox = self.inbox_collection().await?;
        if drop_existing {
            inbox.delete_all().await?;
            inbox.insert_many(items).await?;
        } else {
            inbox.upsert_many(items).await?;
        }
        tracing::debug!("Synced {} items into {}", items.len(), self.collection_name());
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let (inbox, outbox) = self.both().await?;
        let (a, b) = tokio::try_join!(inbox.delete_by_id(id), outbox.delete_by_id(id))?;
        Ok(a || b)
    }

    async fn delete_where(&self, predicate: &Predicate<'_, T>) -> Result<usize> {
        let (inbox, outbox) = self.both().await?;
        let (a, b) = tokio::try_join!(inbox.delete_many(predicate), outbox.delete_many(predicate))?;
        Ok(a + b)
    }

    /// Drops the inbox collection only; pending changes survive
    async fn drop_collection(&self) -> Result<()> {
        self.gate.ensure_ready().await?;
        self.inbox.drop_collection(self.collection_name()).await?;
        self.gate.reprovision(&self.inbox).await
    }
}

#[async_trait]
impl<T: Entity> OutboxOps<T> for OutboxRepository<T> {
    async fn update_item(&self, item: &T) -> Result<()> {
        self.outbox_collection().await?.upsert(item).await
    }

    async fn drop_outbox_collection(&self) -> Result<()> {
        self.gate.ensure_ready().await?;
        self.outbox.drop_collection(self.collection_name()).await?;
        self.gate.reprovision(&self.outbox).await
    }
}
