use std::path::{Path, PathBuf};
use std::sync::Arc;

use docrepo::engine::MemoryEngine;
use docrepo::{DocumentRepository, Entity, FixedFolder, OutboxOps, OutboxRepository, Repository, StoreContext};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Contact {
    id: String,
    name: String,
    #[serde(default)]
    phone: Option<String>,
}

impl Entity for Contact {
    fn id(&self) -> &str {
        &self.id
    }
}

fn contact(id: &str, name: &str) -> Contact {
    Contact { id: id.to_string(), name: name.to_string(), phone: None }
}

fn db(name: &str) -> PathBuf {
    Path::new("/data").join(format!("{}.db", name))
}

fn context(engine: &Arc<MemoryEngine>) -> StoreContext {
    StoreContext::new(engine.clone(), Arc::new(FixedFolder::new("/data")))
}

#[tokio::test]
async fn test_sync_then_local_edit_then_push() {
    let engine = Arc::new(MemoryEngine::new());
    let ctx = context(&engine);
    let repo: OutboxRepository<Contact> = OutboxRepository::new(ctx.store("Inbox"), ctx.store("Outbox"));

    // initial sync
    let synced = vec![contact("c1", "Ada"), contact("c2", "Grace")];
    repo.upsert_all(Some(&synced), true).await.unwrap();

    // local edit
    let mut edited = contact("c1", "Ada Lovelace");
    edited.phone = Some("555".to_string());
    repo.update_item(&edited).await.unwrap();

    let merged = repo.get_all().await.unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0], edited);
    assert_eq!(repo.get_by_id("c1").await.unwrap(), Some(edited.clone()));

    // push done: next sync carries the edit, outbox is cleared
    repo.upsert_all(Some(&[edited.clone(), contact("c2", "Grace")]), true)
        .await
        .unwrap();
    repo.drop_outbox_collection().await.unwrap();

    assert!(repo.get_pending().await.unwrap().is_empty());
    assert_eq!(repo.count().await.unwrap(), 2);
    assert_eq!(repo.get_by_id("c1").await.unwrap(), Some(edited));
}

#[tokio::test]
async fn test_stores_are_shared_between_repositories() {
    let engine = Arc::new(MemoryEngine::new());
    let ctx = context(&engine);
    let inbox = ctx.store("Inbox");
    let outbox = ctx.store("Outbox");

    let dual: OutboxRepository<Contact> = OutboxRepository::new(Arc::clone(&inbox), Arc::clone(&outbox));
    let plain: Repository<Contact> = Repository::new(Arc::clone(&inbox));

    plain.upsert(Some(&contact("c1", "from plain"))).await.unwrap();
    assert_eq!(dual.get_synced().await.unwrap(), vec![contact("c1", "from plain")]);

    // both repositories opened the same two stores once each
    assert_eq!(engine.open_attempts(), 2);
}

#[tokio::test]
async fn test_recovers_from_corrupted_outbox() {
    let engine = Arc::new(MemoryEngine::new());
    let ctx = context(&engine);
    let repo: OutboxRepository<Contact> = OutboxRepository::new(ctx.store("Inbox"), ctx.store("Outbox"));

    repo.upsert(Some(&contact("c1", "Ada"))).await.unwrap();
    repo.update_item(&contact("c2", "Grace")).await.unwrap();
    repo.outbox().dispose();
    engine.corrupt(db("Outbox"));

    // the outbox is recreated empty, the inbox is untouched
    assert_eq!(repo.get_all().await.unwrap(), vec![contact("c1", "Ada")]);
    assert!(engine.deleted_paths().contains(&db("Outbox")));
    assert!(!engine.deleted_paths().contains(&db("Inbox")));

    repo.update_item(&contact("c3", "Hopper")).await.unwrap();
    assert_eq!(repo.get_pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_persistent_failure_surfaces_as_corruption() {
    let engine = Arc::new(MemoryEngine::new());
    engine.fail_next_opens(4);
    let ctx = context(&engine);
    let repo: Repository<Contact> = Repository::new(ctx.store("Inbox"));

    let err = repo.get_all().await.unwrap_err();
    assert!(err.is_corruption());
    assert_eq!(engine.open_attempts(), 2);
}

#[tokio::test]
async fn test_dispose_then_reuse() {
    let engine = Arc::new(MemoryEngine::new());
    let ctx = context(&engine);
    let repo: OutboxRepository<Contact> = OutboxRepository::new(ctx.store("Inbox"), ctx.store("Outbox"));

    repo.upsert(Some(&contact("c1", "Ada"))).await.unwrap();
    repo.inbox().dispose();
    repo.outbox().dispose();
    assert!(!repo.inbox().is_open());

    assert_eq!(repo.get_all().await.unwrap(), vec![contact("c1", "Ada")]);
    assert_eq!(engine.open_attempts(), 4);
}

#[tokio::test]
async fn test_teardown_keeps_data_and_reopens() {
    let engine = Arc::new(MemoryEngine::new());
    let ctx = context(&engine);
    let repo: OutboxRepository<Contact> = OutboxRepository::new(ctx.store("Inbox"), ctx.store("Outbox"));

    repo.update_item(&contact("c1", "Ada")).await.unwrap();
    repo.outbox().checkpoint_and_delete().await.unwrap();
    assert!(!repo.outbox().is_open());
    assert_eq!(engine.stats(&db("Outbox")).checkpoints, 1);

    assert_eq!(repo.get_pending().await.unwrap(), vec![contact("c1", "Ada")]);
}
