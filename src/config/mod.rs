//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated, immutable)
//!     → sections handed to each subsystem at construction
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads + validates
//!     → new ResilienceConfig sent over a channel
//!     → threat thresholds swapped in place
//! ```
//!
//! # Design Decisions
//! - All fields have defaults so a minimal (even empty) file works
//! - Only the threat policy is hot-swappable; the rest needs a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, CacheConfig, CircuitBreakerConfig, CorrectionConfig, HealthConfig, LogFormat,
    ObservabilityConfig, ResilienceConfig, RetryConfig, ThreatPolicy,
};
