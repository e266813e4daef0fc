//! Typed view over an engine collection

use std::marker::PhantomData;
use std::sync::Arc;

use crate::engine::{Collection, Document};
use crate::entity::Entity;
use crate::mapper::FieldMapper;
use crate::Result;

/// Predicate over typed entities
pub type Predicate<'a, T> = dyn Fn(&T) -> bool + Send + Sync + 'a;

/// A collection handle bound to an entity type and a mapper snapshot.
///
/// Handles are cheap and short-lived: repositories resolve a fresh one for
/// every call, since a store re-initialization invalidates the old ones.
pub struct TypedCollection<T> {
    raw: Arc<dyn Collection>,
    mapper: FieldMapper,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> TypedCollection<T> {
    pub fn new(raw: Arc<dyn Collection>, mapper: FieldMapper) -> Self {
        Self { raw, mapper, _marker: PhantomData }
    }

    pub fn name(&self) -> &str {
        self.raw.name()
    }

    pub async fn count(&self) -> Result<usize> {
        self.raw.count().await
    }

    pub async fn find_all(&self) -> Result<Vec<T>> {
        let docs = self.raw.find_all().await?;
        self.decode_all(docs)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        self.raw
            .find_by_id(id)
            .await?
            .map(|doc| self.mapper.decode(&doc))
            .transpose()
    }

    pub async fn find_one(&self, predicate: &Predicate<'_, T>) -> Result<Option<T>> {
        let mapper = &self.mapper;
        let filter = move |doc: &Document| matches(mapper, doc, predicate);
        self.raw
            .find_one(&filter)
            .await?
            .map(|doc| self.mapper.decode(&doc))
            .transpose()
    }

    pub async fn find(&self, predicate: &Predicate<'_, T>) -> Result<Vec<T>> {
        let mapper = &self.mapper;
        let filter = move |doc: &Document| matches(mapper, doc, predicate);
        let docs = self.raw.find(&filter).await?;
        self.decode_all(docs)
    }

    pub async fn upsert(&self, item: &T) -> Result<()> {
        self.raw.upsert(self.mapper.encode(item)?).await
    }

    pub async fn upsert_many(&self, items: &[T]) -> Result<usize> {
        let docs = self.encode_all(items)?;
        self.raw.upsert_many(docs).await
    }

    pub async fn insert_many(&self, items: &[T]) -> Result<usize> {
        let docs = self.encode_all(items)?;
        self.raw.insert_many(docs).await
    }

    pub async fn delete_all(&self) -> Result<usize> {
        self.raw.delete_all().await
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<bool> {
        self.raw.delete_by_id(id).await
    }

    pub async fn delete_many(&self, predicate: &Predicate<'_, T>) -> Result<usize> {
        let mapper = &self.mapper;
        let filter = move |doc: &Document| matches(mapper, doc, predicate);
        self.raw.delete_many(&filter).await
    }

    fn encode_all(&self, items: &[T]) -> Result<Vec<Document>> {
        items.iter().map(|item| self.mapper.encode(item)).collect()
    }

    fn decode_all(&self, docs: Vec<Document>) -> Result<Vec<T>> {
        docs.iter().map(|doc| self.mapper.decode(doc)).collect()
    }
}

/// Documents that do not decode as `T` never match
fn matches<T: Entity>(mapper: &FieldMapper, doc: &Document, predicate: &Predicate<'_, T>) -> bool {
    mapper
        .decode::<T>(doc)
        .map(|item| predicate(&item))
        .unwrap_or(false)
}
