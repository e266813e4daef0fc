//! Identity rule used to merge inbox and outbox reads
//!
//! Two entities are the same logical record when they are the same value in
//! memory, or when they share both kind and id. The hash only looks at the id.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use crate::entity::Entity;

/// Equality/hash policy for deduplicating entities across stores
pub trait IdentityComparer<T>: Send + Sync {
    fn same(&self, a: &T, b: &T) -> bool;
    fn identity_hash(&self, item: &T) -> u64;
}

/// Same kind and same id
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultIdentity;

impl<T: Entity> IdentityComparer<T> for DefaultIdentity {
    fn same(&self, a: &T, b: &T) -> bool {
        if std::ptr::eq(a, b) {
            return true;
        }
        a.kind() == b.kind() && a.id() == b.id()
    }

    fn identity_hash(&self, item: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        item.id().hash(&mut hasher);
        hasher.finish()
    }
}

/// Set union of `primary` then `secondary`, keeping the first occurrence of
/// every identity. Order of first appearance is preserved.
pub fn union_by_identity<T>(
    primary: Vec<T>,
    secondary: Vec<T>,
    comparer: &dyn IdentityComparer<T>,
) -> Vec<T> {
    let mut merged: Vec<T> = Vec::with_capacity(primary.len() + secondary.len());
    let mut buckets: HashMap<u64, Vec<usize>> = HashMap::new();

    for item in primary.into_iter().chain(secondary) {
        let hash = comparer.identity_hash(&item);
        let bucket = buckets.entry(hash).or_default();
        if bucket.iter().any(|&idx| comparer.same(&merged[idx], &item)) {
            continue;
        }
        bucket.push(merged.len());
        merged.push(item);
    }

    merged
}
