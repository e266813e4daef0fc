//! Store handles - lifecycle of one database file
//!
//! A `StoreHandle` owns at most one engine connection. It opens lazily,
//! recovers once from an unreadable file by deleting and recreating it, and
//! releases the connection deterministically on `dispose` or drop.

pub mod context;
pub mod handle;

pub use context::StoreContext;
pub use handle::{StoreHandle, DEFAULT_LOCK_TIMEOUT, SENTINEL_COLLECTION};
