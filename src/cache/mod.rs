//! Read-through cache subsystem.
//!
//! # Data Flow
//! ```text
//! Facade read:
//!     policy.rs (entity class → key, TTL, priority)
//!     → store.rs CacheStore::get (fresh)
//!     → on miss: backend, then CacheStore::set
//!     → on open circuit: CacheStore::get (stale allowed)
//!
//! Facade write:
//!     → CacheStore::delete (entity key)
//!     → CacheStore::invalidate_pattern (pattern.rs globs over list keys)
//! ```
//!
//! # Design Decisions
//! - Security-sensitive classes have TTL zero and are never stored
//! - Expired entries linger for a retention window to feed stale fallback
//! - memory.rs is sharded; unrelated keys never contend on one lock

pub mod memory;
pub mod pattern;
pub mod policy;
pub mod store;

pub use memory::{CacheEntry, CacheSummary, MemoryCacheStore};
pub use policy::TtlPolicy;
pub use store::{CachePriority, CacheStore, CacheStoreExt, GetOptions, SetOptions};
