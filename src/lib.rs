//! Resilience core for a government services portal.
//!
//! Read-through caching and circuit breaking around persistence, threat
//! mitigation, automated error correction and an orchestrator tying them
//! together.

pub mod admin;
pub mod cache;
pub mod clock;
pub mod config;
pub mod correction;
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod storage;

pub use config::schema::ResilienceConfig;
pub use health::HealthOrchestrator;
pub use lifecycle::{Components, Shutdown};
pub use storage::ResilientStorageFacade;
