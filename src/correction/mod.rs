//! Error correction.
//!
//! # Data Flow
//! ```text
//! FaultReport
//!     → engine.rs dispatch by fault type, under the type's budget
//!         database_connection → DatabaseProbe reconnect with backoff, else fallback mode
//!         memory_leak         → MemoryReclaimer::reclaim on every tracked cache
//!         network_failure     → ConnectivityProbe battery, majority must pass
//!         service_crash       → ServiceSupervisor bounded restarts
//!         file_system_error   → write/read/remove smoke test in the scratch dir
//!     → CorrectionOutcome + remediation event
//! ```

pub mod engine;
pub mod hooks;

pub use engine::{CorrectionOutcome, CorrectionStats, ErrorCorrectionEngine, FaultReport, FaultType};
pub use hooks::{
    ConnectivityProbe, DatabaseProbe, MemoryReclaimer, Restartable, ServiceRegistry, ServiceSupervisor,
    TcpConnectProbe,
};
