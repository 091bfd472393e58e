//! Persistence layer.
//!
//! # Data Flow
//! ```text
//! Caller
//!     → facade.rs ResilientStorageFacade (cache-aside, breaker, degraded mode)
//!     → provider.rs PersistenceProvider (any backend)
//!     → memory.rs InMemoryProvider (standalone mode and tests)
//! ```

pub mod entities;
pub mod error;
pub mod facade;
pub mod memory;
pub mod provider;

pub use error::{FaultClass, StorageError, StorageResult};
pub use facade::{HealthDocument, HealthLevel, ResilientStorageFacade, DATABASE};
pub use memory::InMemoryProvider;
pub use provider::{Operation, PersistenceProvider};
