//! Readiness gate shared by every repository
//!
//! A repository is ready when each store it depends on is open and this
//! repository's indexes were provisioned against the store's current
//! generation. The check is lock-free; the slow path is serialized per
//! repository so indexes are provisioned once per store generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::Mutex;

use crate::engine::IndexSpec;
use crate::entity::Entity;
use crate::mapper::FieldMapper;
use crate::store::StoreHandle;
use crate::Result;

/// Where a repository keeps its entities and how they are indexed
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub name: String,
    pub indexes: Vec<IndexSpec>,
    pub mapper_hook: Option<fn(&mut FieldMapper)>,
}

impl CollectionSpec {
    /// Name, indexes and mapper hook as declared by the entity type
    pub fn for_entity<T: Entity>() -> Self {
        Self {
            name: T::collection_name(),
            indexes: T::indexes(),
            mapper_hook: Some(T::configure_mapper),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), indexes: Vec::new(), mapper_hook: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_mapper_hook(mut self, hook: fn(&mut FieldMapper)) -> Self {
        self.mapper_hook = Some(hook);
        self
    }
}

struct Dependency {
    store: Arc<StoreHandle>,
    /// Store generation the indexes were provisioned for; 0 means never
    provisioned: AtomicU64,
}

impl Dependency {
    fn is_ready(&self) -> bool {
        self.store.is_open() && self.provisioned.load(Ordering::Acquire) == self.store.generation()
    }
}

pub struct ReadyGate {
    label: String,
    spec: CollectionSpec,
    deps: Vec<Dependency>,
    lock: Mutex<()>,
}

impl ReadyGate {
    pub fn new(label: impl Into<String>, spec: CollectionSpec, stores: Vec<Arc<StoreHandle>>) -> Self {
        Self {
            label: label.into(),
            spec,
            deps: stores
                .into_iter()
                .map(|store| Dependency { store, provisioned: AtomicU64::new(0) })
                .collect(),
            lock: Mutex::new(()),
        }
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub fn is_ready(&self) -> bool {
        self.deps.iter().all(Dependency::is_ready)
    }

    /// Open every dependency and provision indexes where needed
    pub async fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        if self.is_ready() {
            return Ok(());
        }

        tracing::debug!("Initializing {}", self.label);
        let pending: Vec<&Dependency> = self.deps.iter().filter(|dep| !dep.is_ready()).collect();
        try_join_all(pending.iter().map(|dep| dep.store.initialize())).await?;

        for dep in pending {
            self.provision(dep).await?;
        }
        Ok(())
    }

    /// Provision indexes on `store` again, e.g. after its collection was dropped
    pub async fn reprovision(&self, store: &Arc<StoreHandle>) -> Result<()> {
        let _guard = self.lock.lock().await;
        for dep in self.deps.iter().filter(|dep| Arc::ptr_eq(&dep.store, store)) {
            self.provision(dep).await?;
        }
        Ok(())
    }

    async fn provision(&self, dep: &Dependency) -> Result<()> {
        if let Some(hook) = self.spec.mapper_hook {
            dep.store.configure_mapper(hook);
        }

        let generation = dep.store.generation();
        let conn = dep.store.connection().await?;
        let collection = conn.collection(&self.spec.name).await?;
        for index in &self.spec.indexes {
            collection.ensure_index(index).await?;
        }

        dep.provisioned.store(generation, Ordering::Release);
        tracing::debug!(
            "Provisioned {} on {} ({} indexes, generation {})",
            self.spec.name,
            dep.store.name(),
            self.spec.indexes.len(),
            generation
        );
        Ok(())
    }
}
