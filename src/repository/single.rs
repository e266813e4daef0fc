use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use super::gate::{CollectionSpec, ReadyGate};
use super::DocumentRepository;
use crate::collection::{Predicate, TypedCollection};
use crate::entity::{short_type_name, Entity};
use crate::store::StoreHandle;
use crate::Result;

/// Typed CRUD over one collection of one store
pub struct Repository<T> {
    store: Arc<StoreHandle>,
    gate: ReadyGate,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    pub fn new(store: Arc<StoreHandle>) -> Self {
        Self::with_spec(store, CollectionSpec::for_entity::<T>())
    }

    pub fn with_spec(store: Arc<StoreHandle>, spec: CollectionSpec) -> Self {
        let label = format!("Repository<{}> on {}", short_type_name::<T>(), store.name());
        Self {
            gate: ReadyGate::new(label, spec, vec![Arc::clone(&store)]),
            store,
            _marker: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<StoreHandle> {
        &self.store
    }

    pub fn collection_name(&self) -> &str {
        &self.gate.spec().name
    }

    async fn collection(&self) -> Result<TypedCollection<T>> {
        self.gate.ensure_ready().await?;
        self.store.collection(self.collection_name()).await
    }
}

#[async_trait]
impl<T: Entity> DocumentRepository<T> for Repository<T> {
    async fn initialize(&self) -> Result<()> {
        self.gate.ensure_ready().await
    }

    async fn count(&self) -> Result<usize> {
        self.collection().await?.count().await
    }

    async fn get_all(&self) -> Result<Vec<T>> {
        self.collection().await?.find_all().await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<T>> {
        self.collection().await?.find_by_id(id).await
    }

    async fn find(&self, predicate: &Predicate<'_, T>) -> Result<Option<T>> {
        self.collection().await?.find_one(predicate).await
    }

    async fn query(&self, predicate: &Predicate<'_, T>) -> Result<Vec<T>> {
        self.collection().await?.find(predicate).await
    }

    async fn upsert(&self, item: Option<&T>) -> Result<()> {
        let Some(item) = item else {
            return Ok(());
        };
        self.collection().await?.upsert(item).await
    }

    async fn upsert_all(&self, items: Option<&[T]>, drop_existing: bool) -> Result<()> {
        let Some(items) = items else {
            return Ok(());
        };

        let collection = self.collection().await?;
        if drop_existing {
            let removed = collection.delete_all().await?;
            let inserted = collection.insert_many(items).await?;
            tracing::debug!(
                "Replaced {} with {} items ({} removed)",
                self.collection_name(),
                inserted,
                removed
            );
        } else {
            collection.upsert_many(items).await?;
        }
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        self.collection().await?.delete_by_id(id).await
    }

    async fn delete_where(&self, predicate: &Predicate<'_, T>) -> Result<usize> {
        self.collection().await?.delete_many(predicate).await
    }

    async fn drop_collection(&self) -> Result<()> {
        self.gate.ensure_ready().await?;
        self.store.drop_collection(self.collection_name()).await?;
        self.gate.reprovision(&self.store).await
    }
}
