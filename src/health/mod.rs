//! Health orchestration.
//!
//! # Data Flow
//! ```text
//! Detectors:
//!     report_threat → spawned task → ThreatMitigationEngine
//!     report_fault  → spawned task → ErrorCorrectionEngine
//!
//! Periodic loop (orchestrator.rs):
//!     Timer
//!     → sweep expired threat records and cache entries
//!     → trigger_health_check (report.rs aggregate)
//!     → backend unreachable or in fallback mode → database correction
//! ```
//!
//! # Design Decisions
//! - Every incident runs on its own task; nothing serializes on one lock
//! - "error" is reserved for unreachable subsystems
//! - Incident counters are RAII guards, correct even if a task panics

pub mod orchestrator;
pub mod report;

pub use orchestrator::{HealthLoopService, HealthOrchestrator, IncidentCounts, OrchestratorStatus, HEALTH_LOOP};
pub use report::{AggregateStatus, HealthReport, SubsystemHealth, SubsystemState};
