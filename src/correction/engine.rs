//! Per-fault-type recovery strategies.
//!
//! Each strategy runs under its own budget. Running out of budget is a
//! failed outcome (`budget_exceeded`), never a panic or an error.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::CorrectionConfig;
use crate::correction::hooks::{
    ConnectivityProbe, DatabaseProbe, MemoryReclaimer, ServiceRegistry, ServiceSupervisor, TcpConnectProbe,
};
use crate::events::{EventBus, RemediationEvent, RemediationKind};
use crate::resilience::backoff::ExponentialBackoff;
use crate::resilience::within_budget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    DatabaseConnection,
    MemoryLeak,
    NetworkFailure,
    ServiceCrash,
    FileSystemError,
}

impl FaultType {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultType::DatabaseConnection => "database_connection",
            FaultType::MemoryLeak => "memory_leak",
            FaultType::NetworkFailure => "network_failure",
            FaultType::ServiceCrash => "service_crash",
            FaultType::FileSystemError => "file_system_error",
        }
    }

    fn remediation_kind(self) -> RemediationKind {
        match self {
            FaultType::DatabaseConnection => RemediationKind::DatabaseRecovery,
            FaultType::MemoryLeak => RemediationKind::MemoryRecovery,
            FaultType::NetworkFailure => RemediationKind::NetworkRecovery,
            FaultType::ServiceCrash => RemediationKind::ServiceRecovery,
            FaultType::FileSystemError => RemediationKind::FilesystemRecovery,
        }
    }
}

/// An operational fault reported by a detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultReport {
    pub fault_type: FaultType,
    /// Crashed service, for `service_crash`.
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub details: String,
}

impl FaultReport {
    pub fn new(fault_type: FaultType) -> Self {
        Self {
            fault_type,
            service: None,
            details: String::new(),
        }
    }

    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            fault_type: FaultType::ServiceCrash,
            service: Some(service.into()),
            details: String::new(),
        }
    }
}

/// Uniform result of one correction attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionOutcome {
    pub fault_type: FaultType,
    pub success: bool,
    pub action: &'static str,
    pub details: String,
    pub correction_time_ms: u64,
    pub needs_restart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_mode: Option<bool>,
}

struct Attempt {
    success: bool,
    action: &'static str,
    details: String,
    needs_restart: bool,
    fallback_mode: Option<bool>,
}

impl Attempt {
    fn ok(action: &'static str, details: impl Into<String>) -> Self {
        Self {
            success: true,
            action,
            details: details.into(),
            needs_restart: false,
            fallback_mode: None,
        }
    }

    fn failed(action: &'static str, details: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::ok(action, details)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionStats {
    pub attempted: u64,
    pub failed: u64,
}

pub struct ErrorCorrectionEngine {
    config: CorrectionConfig,
    database: Option<Arc<dyn DatabaseProbe>>,
    reclaimers: Vec<Arc<dyn MemoryReclaimer>>,
    connectivity: Arc<dyn ConnectivityProbe>,
    supervisor: Arc<dyn ServiceSupervisor>,
    scratch_dir: PathBuf,
    events: EventBus,
    attempted: AtomicU64,
    failed: AtomicU64,
}

impl ErrorCorrectionEngine {
    pub fn new(config: CorrectionConfig, events: EventBus) -> Self {
        let scratch_dir = config
            .scratch_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        Self {
            config,
            database: None,
            reclaimers: Vec::new(),
            connectivity: Arc::new(TcpConnectProbe),
            supervisor: Arc::new(ServiceRegistry::new()),
            scratch_dir,
            events,
            attempted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn with_database(mut self, probe: Arc<dyn DatabaseProbe>) -> Self {
        self.database = Some(probe);
        self
    }

    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn MemoryReclaimer>) -> Self {
        self.reclaimers.push(reclaimer);
        self
    }

    pub fn with_connectivity(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.connectivity = probe;
        self
    }

    pub fn with_supervisor(mut self, supervisor: Arc<dyn ServiceSupervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn stats(&self) -> CorrectionStats {
        CorrectionStats {
            attempted: self.attempted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    fn budget(&self, fault: FaultType) -> Duration {
        let secs = match fault {
            FaultType::DatabaseConnection => self.config.database_budget_secs,
            FaultType::MemoryLeak => self.config.memory_budget_secs,
            FaultType::NetworkFailure => self.config.network_budget_secs,
            FaultType::ServiceCrash => self.config.service_budget_secs,
            FaultType::FileSystemError => self.config.filesystem_budget_secs,
        };
        Duration::from_secs(secs)
    }

    /// Run the strategy for `report` and emit one remediation event.
    pub async fn correct(&self, report: &FaultReport) -> CorrectionOutcome {
        let started = Instant::now();
        let fault = report.fault_type;
        let budget = self.budget(fault);
        tracing::info!(fault = fault.as_str(), budget_secs = budget.as_secs(), "Starting error correction");

        let attempt = match within_budget(budget, self.run(report, started + budget)).await {
            Ok(attempt) => attempt,
            Err(exceeded) => {
                let mut attempt = Attempt::failed("budget_exceeded", exceeded.to_string());
                match fault {
                    FaultType::DatabaseConnection => attempt.fallback_mode = self.enter_fallback(),
                    // A restart that hangs is a restart that failed.
                    FaultType::ServiceCrash => attempt.needs_restart = true,
                    _ => {}
                }
                attempt
            }
        };

        let outcome = CorrectionOutcome {
            fault_type: fault,
            success: attempt.success,
            action: attempt.action,
            details: attempt.details,
            correction_time_ms: started.elapsed().as_millis() as u64,
            needs_restart: attempt.needs_restart,
            fallback_mode: attempt.fallback_mode,
        };

        self.attempted.fetch_add(1, Ordering::Relaxed);
        if !outcome.success {
            self.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                fault = fault.as_str(),
                action = outcome.action,
                details = %outcome.details,
                "Error correction failed"
            );
        }

        let mut event = RemediationEvent::new(
            fault.remediation_kind(),
            outcome.correction_time_ms,
            outcome.success,
            format!("{}: {}", outcome.action, outcome.details),
        );
        if let Some(fallback) = outcome.fallback_mode {
            event = event.with_fallback_mode(fallback);
        }
        self.events.emit(event);

        outcome
    }

    async fn run(&self, report: &FaultReport, deadline: Instant) -> Attempt {
        match report.fault_type {
            FaultType::DatabaseConnection => self.recover_database(deadline).await,
            FaultType::MemoryLeak => self.release_memory().await,
            FaultType::NetworkFailure => self.probe_network().await,
            FaultType::ServiceCrash => self.restart_service(report.service.as_deref()).await,
            FaultType::FileSystemError => self.smoke_test_filesystem().await,
        }
    }

    fn enter_fallback(&self) -> Option<bool> {
        let db = self.database.as_ref()?;
        db.set_fallback_mode(true);
        Some(true)
    }

    fn reconnect_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::from_millis(self.config.reconnect_base_delay_ms, self.config.reconnect_max_delay_ms)
    }

    /// Reconnect with backoff until the next wait would overrun the budget,
    /// then switch the facade into fallback mode.
    async fn recover_database(&self, deadline: Instant) -> Attempt {
        let Some(db) = self.database.as_ref() else {
            return Attempt::failed("no_database_probe", "no database registered for recovery");
        };
        let backoff = self.reconnect_backoff();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match db.reconnect().await {
                Ok(()) => {
                    db.set_fallback_mode(false);
                    let mut ok = Attempt::ok("reconnected", format!("database reachable after {} attempt(s)", attempt));
                    ok.fallback_mode = Some(false);
                    return ok;
                }
                Err(e) => {
                    let delay = backoff.delay(attempt);
                    if Instant::now() + delay >= deadline {
                        db.set_fallback_mode(true);
                        let mut failed = Attempt::failed(
                            "fallback_mode",
                            format!("database unreachable after {} attempt(s): {}", attempt, e),
                        );
                        failed.fallback_mode = Some(true);
                        return failed;
                    }
                    tracing::debug!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Database reconnect failed");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn release_memory(&self) -> Attempt {
        let held = |reclaimers: &[Arc<dyn MemoryReclaimer>]| reclaimers.iter().map(|r| r.held_bytes()).sum::<u64>();

        let before = held(&self.reclaimers);
        if before == 0 {
            return Attempt::ok("nothing_to_reclaim", "no tracked caches hold memory");
        }

        let mut freed = 0;
        for reclaimer in &self.reclaimers {
            let bytes = reclaimer.reclaim().await;
            tracing::debug!(reclaimer = reclaimer.name(), bytes, "Released memory");
            freed += bytes;
        }

        let after = held(&self.reclaimers);
        if after < before {
            Attempt::ok("caches_released", format!("held memory {} -> {} bytes ({} freed)", before, after, freed))
        } else {
            Attempt::failed("no_reduction", format!("held memory still {} bytes", after))
        }
    }

    async fn probe_network(&self) -> Attempt {
        let targets = &self.config.probe_targets;
        if targets.is_empty() {
            return Attempt::failed("no_probe_targets", "no connectivity probe targets configured");
        }

        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let results = join_all(targets.iter().map(|t| self.connectivity.probe(t, timeout))).await;

        let mut passed = 0;
        for (target, result) in targets.iter().zip(&results) {
            match result {
                Ok(()) => passed += 1,
                Err(e) => tracing::debug!(target = %target, error = %e, "Connectivity probe failed"),
            }
        }

        let details = format!("{}/{} probes passed", passed, targets.len());
        if passed * 2 > targets.len() {
            Attempt::ok("connectivity_verified", details)
        } else {
            Attempt::failed("connectivity_lost", details)
        }
    }

    async fn restart_service(&self, service: Option<&str>) -> Attempt {
        let Some(service) = service else {
            return Attempt::failed("no_service", "crash report did not name a service");
        };
        let max_attempts = self.config.max_restart_attempts.max(1);
        let backoff = self.reconnect_backoff();

        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            match self.supervisor.restart(service).await {
                Ok(()) => {
                    return Attempt::ok(
                        "service_restarted",
                        format!("{} restarted on attempt {}", service, attempt),
                    );
                }
                Err(e) => {
                    tracing::warn!(service, attempt, error = %e, "Service restart failed");
                    last_error = e;
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff.delay(attempt)).await;
                    }
                }
            }
        }

        let mut failed = Attempt::failed(
            "restart_exhausted",
            format!("{} failed {} restart(s): {}", service, max_attempts, last_error),
        );
        failed.needs_restart = true;
        failed
    }

    async fn smoke_test_filesystem(&self) -> Attempt {
        let file = ScratchFile::new(self.scratch_dir.join(format!(".portal-smoke-{:016x}", fastrand::u64(..))));
        let payload = format!("smoke-test {}", fastrand::u64(..));

        // The future owns the file, so a budget cancellation removes it too.
        let result = async move {
            tokio::fs::write(file.path(), payload.as_bytes()).await?;
            let read = tokio::fs::read(file.path()).await?;
            file.remove().await?;
            Ok::<_, std::io::Error>(read == payload.as_bytes())
        }
        .await;

        match result {
            Ok(true) => Attempt::ok("filesystem_verified", format!("read/write ok in {}", self.scratch_dir.display())),
            Ok(false) => Attempt::failed("filesystem_corrupt", "read back different bytes"),
            Err(e) => Attempt::failed("filesystem_unusable", e.to_string()),
        }
    }
}

/// Smoke-test file that is deleted on drop unless removed explicitly.
struct ScratchFile {
    path: PathBuf,
    armed: bool,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) -> std::io::Result<()> {
        self.armed = false;
        tokio::fs::remove_file(&self.path).await
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.armed {
            // May never have been created.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::hooks::Restartable;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32};

    #[derive(Default)]
    struct FlakyDb {
        fail_first: AtomicU32,
        down: AtomicBool,
        fallback: AtomicBool,
    }

    #[async_trait]
    impl DatabaseProbe for FlakyDb {
        async fn reconnect(&self) -> Result<(), String> {
            if self.down.load(Ordering::SeqCst) {
                return Err("connection refused".into());
            }
            let failing = self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                Err("connection reset".into())
            } else {
                Ok(())
            }
        }

        fn set_fallback_mode(&self, active: bool) {
            self.fallback.store(active, Ordering::SeqCst);
        }

        fn fallback_mode(&self) -> bool {
            self.fallback.load(Ordering::SeqCst)
        }
    }

    struct Hanging;

    #[async_trait]
    impl DatabaseProbe for Hanging {
        async fn reconnect(&self) -> Result<(), String> {
            std::future::pending().await
        }

        fn set_fallback_mode(&self, _active: bool) {}

        fn fallback_mode(&self) -> bool {
            false
        }
    }

    struct Fixed(Vec<bool>);

    #[async_trait]
    impl ConnectivityProbe for Fixed {
        async fn probe(&self, target: &str, _timeout: Duration) -> Result<(), String> {
            let index: usize = target.parse().map_err(|_| "bad target".to_string())?;
            if self.0[index] {
                Ok(())
            } else {
                Err("unreachable".into())
            }
        }
    }

    struct NeverRestarts;

    #[async_trait]
    impl Restartable for NeverRestarts {
        async fn restart(&self) -> Result<(), String> {
            Err("exit code 1".into())
        }
    }

    struct HangsOnRestart;

    #[async_trait]
    impl Restartable for HangsOnRestart {
        async fn restart(&self) -> Result<(), String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn engine(config: CorrectionConfig) -> ErrorCorrectionEngine {
        ErrorCorrectionEngine::new(config, EventBus::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_database_reconnects_after_backoff() {
        let db = Arc::new(FlakyDb::default());
        db.fail_first.store(2, Ordering::SeqCst);
        db.fallback.store(true, Ordering::SeqCst);
        let engine = engine(CorrectionConfig::default()).with_database(db.clone());

        let outcome = engine.correct(&FaultReport::new(FaultType::DatabaseConnection)).await;
        assert!(outcome.success);
        assert_eq!(outcome.fallback_mode, Some(false));
        assert!(!db.fallback_mode());
        assert!(outcome.correction_time_ms <= 30_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_database_falls_back_within_budget() {
        let db = Arc::new(FlakyDb::default());
        db.down.store(true, Ordering::SeqCst);
        let engine = engine(CorrectionConfig::default()).with_database(db.clone());

        let outcome = engine.correct(&FaultReport::new(FaultType::DatabaseConnection)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.action, "fallback_mode");
        assert_eq!(outcome.fallback_mode, Some(true));
        assert!(db.fallback_mode());
        assert!(outcome.correction_time_ms <= 30_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_overrun_is_an_outcome() {
        let engine = engine(CorrectionConfig::default()).with_database(Arc::new(Hanging));
        let outcome = engine.correct(&FaultReport::new(FaultType::DatabaseConnection)).await;

        assert!(!outcome.success);
        assert_eq!(outcome.action, "budget_exceeded");
        assert_eq!(engine.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_memory_with_nothing_held() {
        let outcome = engine(CorrectionConfig::default())
            .correct(&FaultReport::new(FaultType::MemoryLeak))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.action, "nothing_to_reclaim");
    }

    #[tokio::test]
    async fn test_network_majority() {
        let config = CorrectionConfig {
            probe_targets: vec!["0".into(), "1".into(), "2".into()],
            ..CorrectionConfig::default()
        };
        let passing = engine(config.clone()).with_connectivity(Arc::new(Fixed(vec![true, true, false])));
        assert!(passing.correct(&FaultReport::new(FaultType::NetworkFailure)).await.success);

        let failing = engine(config).with_connectivity(Arc::new(Fixed(vec![true, false, false])));
        let outcome = failing.correct(&FaultReport::new(FaultType::NetworkFailure)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.details, "1/3 probes passed");
    }

    #[tokio::test]
    async fn test_network_without_targets_fails() {
        let outcome = engine(CorrectionConfig::default())
            .correct(&FaultReport::new(FaultType::NetworkFailure))
            .await;
        assert_eq!(outcome.action, "no_probe_targets");
        assert!(!outcome.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_exhaustion_needs_restart() {
        let registry = ServiceRegistry::new();
        registry.register("notifier", Arc::new(NeverRestarts));
        let engine = engine(CorrectionConfig::default()).with_supervisor(Arc::new(registry));

        let outcome = engine.correct(&FaultReport::for_service("notifier")).await;
        assert!(!outcome.success);
        assert!(outcome.needs_restart);
        assert_eq!(outcome.action, "restart_exhausted");
    }

    #[tokio::test]
    async fn test_filesystem_smoke_test() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(CorrectionConfig::default()).with_scratch_dir(dir.path());

        let outcome = engine.correct(&FaultReport::new(FaultType::FileSystemError)).await;
        assert!(outcome.success, "{}", outcome.details);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let broken = engine_with_missing_dir();
        assert!(!broken.correct(&FaultReport::new(FaultType::FileSystemError)).await.success);
    }

    fn engine_with_missing_dir() -> ErrorCorrectionEngine {
        engine(CorrectionConfig::default()).with_scratch_dir("/nonexistent/portal-resilience-scratch")
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_restart_needs_restart() {
        let registry = ServiceRegistry::new();
        registry.register("notifier", Arc::new(HangsOnRestart));
        let engine = engine(CorrectionConfig::default()).with_supervisor(Arc::new(registry));

        let outcome = engine.correct(&FaultReport::for_service("notifier")).await;
        assert!(!outcome.success);
        assert_eq!(outcome.action, "budget_exceeded");
        assert!(outcome.needs_restart);
        assert!(outcome.correction_time_ms <= 15_000 + 100);
    }

    #[tokio::test]
    async fn test_scratch_file_removed_when_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".portal-smoke-abandoned");

        let file = ScratchFile::new(path.clone());
        tokio::fs::write(file.path(), b"partial").await.unwrap();
        // Dropped between write and remove, as a cancelled future would.
        drop(file);
        assert!(!path.exists());

        let file = ScratchFile::new(path.clone());
        tokio::fs::write(file.path(), b"done").await.unwrap();
        file.remove().await.unwrap();
        assert!(!path.exists());
    }
}
