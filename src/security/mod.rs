//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Threat report:
//!     → threats.rs (score, decide block/quarantine/monitor)
//!     → rate_limit.rs (DDoS reports: per-source token bucket)
//!     → remediation event
//!
//! Incoming traffic:
//!     → threats.rs admit(ip): reject blocked, throttle protected sources
//! ```
//!
//! # Design Decisions
//! - Scores only rise; a block is never downgraded by a later report
//! - No durable round trips on the mitigation path
//! - Thresholds can be swapped at runtime without a restart

pub mod rate_limit;
pub mod threats;

pub use threats::{
    Classification, MitigationOutcome, ThreatAction, ThreatCategory, ThreatCounts, ThreatMitigationEngine,
    ThreatRecord, ThreatReport, TrafficDecision,
};
