//! Incident routing and aggregate health.
//!
//! # Responsibilities
//! - Spawn one task per reported threat or fault
//! - Periodically sweep subsystems and expire stale state
//! - Serve the aggregate status document

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::cache::{CacheStore, MemoryCacheStore};
use crate::clock::unix_millis;
use crate::config::HealthConfig;
use crate::correction::{
    CorrectionOutcome, CorrectionStats, ErrorCorrectionEngine, FaultReport, FaultType, Restartable,
};
use crate::health::report::{aggregate, HealthReport, SubsystemHealth, SubsystemState};
use crate::lifecycle::Shutdown;
use crate::security::{MitigationOutcome, ThreatCounts, ThreatMitigationEngine, ThreatReport};
use crate::storage::{FaultClass, HealthDocument, HealthLevel, PersistenceProvider, ResilientStorageFacade, StorageError};

/// Service name of the periodic health loop in the service registry.
pub const HEALTH_LOOP: &str = "health_loop";

/// Counts an incident as active for as long as it is held.
struct IncidentGuard {
    active: Arc<AtomicUsize>,
}

impl IncidentGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for IncidentGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentCounts {
    pub threats: usize,
    pub faults: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub is_running: bool,
    pub active_incidents: IncidentCounts,
    pub threats_handled: u64,
    pub faults_handled: u64,
    pub threats: ThreatCounts,
    pub corrections: CorrectionStats,
    pub storage: HealthDocument,
    pub last_health_check: Option<HealthReport>,
}

pub struct HealthOrchestrator {
    storage: Arc<ResilientStorageFacade>,
    cache: Arc<dyn CacheStore>,
    memory_cache: Option<Arc<MemoryCacheStore>>,
    threats: Arc<ThreatMitigationEngine>,
    corrections: Arc<ErrorCorrectionEngine>,
    config: HealthConfig,

    running: AtomicBool,
    active_threats: Arc<AtomicUsize>,
    active_faults: Arc<AtomicUsize>,
    threats_handled: Arc<AtomicU64>,
    faults_handled: Arc<AtomicU64>,
    last_report: ArcSwapOption<HealthReport>,
    stop: Shutdown,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthOrchestrator {
    pub fn new(
        storage: Arc<ResilientStorageFacade>,
        cache: Arc<dyn CacheStore>,
        threats: Arc<ThreatMitigationEngine>,
        corrections: Arc<ErrorCorrectionEngine>,
        config: HealthConfig,
    ) -> Self {
        Self {
            storage,
            cache,
            memory_cache: None,
            threats,
            corrections,
            config,
            running: AtomicBool::new(false),
            active_threats: Arc::new(AtomicUsize::new(0)),
            active_faults: Arc::new(AtomicUsize::new(0)),
            threats_handled: Arc::new(AtomicU64::new(0)),
            faults_handled: Arc::new(AtomicU64::new(0)),
            last_report: ArcSwapOption::empty(),
            stop: Shutdown::new(),
            task: Mutex::new(None),
        }
    }

    /// Let the periodic loop sweep expired entries from this store.
    pub fn with_memory_cache(mut self, cache: Arc<MemoryCacheStore>) -> Self {
        self.memory_cache = Some(cache);
        self
    }

    pub fn threats(&self) -> &Arc<ThreatMitigationEngine> {
        &self.threats
    }

    pub fn storage(&self) -> &Arc<ResilientStorageFacade> {
        &self.storage
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the periodic health loop.
    pub fn start(self: &Arc<Self>) {
        if self.stop.is_triggered() {
            tracing::warn!("Health orchestrator already shut down, not restarting");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let handle = self.spawn_loop();
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        tracing::info!(interval_secs = self.config.interval_secs, "Health orchestrator started");
    }

    fn spawn_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let stop = self.stop.subscribe();
        tokio::spawn(async move { this.run(stop).await })
    }

    /// Abort the periodic loop, if any, and spawn a fresh one.
    pub fn restart_loop(self: &Arc<Self>) -> Result<(), String> {
        if self.stop.is_triggered() {
            return Err("health orchestrator is shut down".to_string());
        }
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = task.take() {
            old.abort();
        }
        *task = Some(self.spawn_loop());
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Health loop restarted");
        Ok(())
    }

    /// Stop the loop and wait for it to exit. In-flight incidents finish on
    /// their own.
    pub async fn shutdown(&self) {
        self.stop.trigger();
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Health loop task failed");
            }
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Health orchestrator stopped");
    }

    async fn run(self: Arc<Self>, mut stop: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Periodic health checks disabled");
            let _ = stop.recv().await;
            return;
        }

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.periodic_sweep().await;
                }
                _ = stop.recv() => {
                    tracing::info!("Health loop received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn periodic_sweep(&self) {
        let expired = self.threats.sweep_expired();
        let swept = self.memory_cache.as_ref().map_or(0, |c| c.sweep_expired());
        if expired > 0 || swept > 0 {
            tracing::debug!(expired_threats = expired, expired_cache_entries = swept, "Expired state swept");
        }

        let report = self.trigger_health_check().await;

        // A dead backend, or one that came back while fallback mode is on,
        // both need the database strategy.
        let needs_db_recovery = report
            .subsystems
            .iter()
            .any(|s| s.name == "persistence" && s.state == SubsystemState::Unreachable)
            || self.storage.health_status().status == HealthLevel::Critical;
        if needs_db_recovery && self.active_faults.load(Ordering::SeqCst) == 0 {
            self.report_fault(FaultReport::new(FaultType::DatabaseConnection));
        }
    }

    /// Route a threat report to mitigation on its own task.
    pub fn report_threat(&self, report: ThreatReport) -> JoinHandle<MitigationOutcome> {
        let guard = IncidentGuard::new(self.active_threats.clone());
        let engine = Arc::clone(&self.threats);
        let handled = Arc::clone(&self.threats_handled);
        tokio::spawn(async move {
            let _guard = guard;
            let outcome = engine.mitigate(&report);
            handled.fetch_add(1, Ordering::Relaxed);
            outcome
        })
    }

    /// Route an operational fault to correction on its own task.
    pub fn report_fault(&self, report: FaultReport) -> JoinHandle<CorrectionOutcome> {
        let guard = IncidentGuard::new(self.active_faults.clone());
        let engine = Arc::clone(&self.corrections);
        let handled = Arc::clone(&self.faults_handled);
        tokio::spawn(async move {
            let _guard = guard;
            let outcome = engine.correct(&report).await;
            handled.fetch_add(1, Ordering::Relaxed);
            outcome
        })
    }

    /// Route a storage failure by fault class. Only an unreachable backend
    /// warrants correction; everything else was already handled locally.
    pub fn report_storage_error(&self, err: &StorageError) -> Option<JoinHandle<CorrectionOutcome>> {
        match err.class() {
            FaultClass::BackendUnavailable => {
                let mut report = FaultReport::new(FaultType::DatabaseConnection);
                report.details = err.to_string();
                Some(self.report_fault(report))
            }
            _ => None,
        }
    }

    /// Check every subsystem concurrently and store the result.
    pub async fn trigger_health_check(&self) -> HealthReport {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.check_timeout_ms);

        let (persistence, cache) = tokio::join!(self.check_persistence(timeout), self.check_cache(timeout));
        let mut subsystems = vec![persistence, cache, self.check_breakers(), self.check_threats()];
        subsystems.push(self.check_corrections().await);

        let report = HealthReport {
            status: aggregate(&subsystems),
            subsystems,
            checked_at_ms: unix_millis(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::debug!(status = ?report.status, duration_ms = report.duration_ms, "Health check completed");
        self.last_report.store(Some(Arc::new(report.clone())));
        report
    }

    async fn check_persistence(&self, timeout: Duration) -> SubsystemHealth {
        const NAME: &str = "persistence";
        match time::timeout(timeout, self.storage.ping()).await {
            Ok(Ok(())) => {
                let doc = self.storage.health_status();
                match doc.status {
                    HealthLevel::Healthy => SubsystemHealth::new(NAME, SubsystemState::Ok, "reachable"),
                    HealthLevel::Degraded if doc.degraded_mode => SubsystemHealth::new(
                        NAME,
                        SubsystemState::Degraded,
                        format!("missing {}", doc.missing_methods.join(", ")),
                    ),
                    HealthLevel::Degraded => SubsystemHealth::new(NAME, SubsystemState::Degraded, "circuit open"),
                    HealthLevel::Critical => SubsystemHealth::new(NAME, SubsystemState::Degraded, "fallback mode active"),
                }
            }
            Ok(Err(e)) => SubsystemHealth::new(NAME, SubsystemState::Unreachable, e.to_string()),
            Err(_) => SubsystemHealth::new(NAME, SubsystemState::Unreachable, "ping timed out"),
        }
    }

    async fn check_cache(&self, timeout: Duration) -> SubsystemHealth {
        const NAME: &str = "cache";
        match time::timeout(timeout, self.cache.ping()).await {
            Ok(true) => SubsystemHealth::new(NAME, SubsystemState::Ok, "reachable"),
            Ok(false) => SubsystemHealth::new(NAME, SubsystemState::Unreachable, "ping failed"),
            Err(_) => SubsystemHealth::new(NAME, SubsystemState::Unreachable, "ping timed out"),
        }
    }

    fn check_breakers(&self) -> SubsystemHealth {
        let open: Vec<String> = self
            .storage
            .executor()
            .breaker_snapshots()
            .into_iter()
            .filter(|s| s.state != crate::resilience::CircuitState::Closed)
            .map(|s| s.dependency)
            .collect();
        if open.is_empty() {
            SubsystemHealth::new("circuit_breakers", SubsystemState::Ok, "all closed")
        } else {
            SubsystemHealth::new("circuit_breakers", SubsystemState::Degraded, format!("not closed: {}", open.join(", ")))
        }
    }

    fn check_threats(&self) -> SubsystemHealth {
        let counts = self.threats.counts();
        SubsystemHealth::new(
            "threat_engine",
            SubsystemState::Ok,
            format!("{} blocked, {} quarantined", counts.blocked, counts.quarantined),
        )
    }

    async fn check_corrections(&self) -> SubsystemHealth {
        let dir = self.corrections.scratch_dir();
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => SubsystemHealth::new("correction_engine", SubsystemState::Ok, "ready"),
            _ => SubsystemHealth::new(
                "correction_engine",
                SubsystemState::Degraded,
                format!("scratch dir {} unavailable", dir.display()),
            ),
        }
    }

    pub fn last_health_check(&self) -> Option<HealthReport> {
        self.last_report.load_full().map(|r| (*r).clone())
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            is_running: self.is_running(),
            active_incidents: IncidentCounts {
                threats: self.active_threats.load(Ordering::SeqCst),
                faults: self.active_faults.load(Ordering::SeqCst),
            },
            threats_handled: self.threats_handled.load(Ordering::Relaxed),
            faults_handled: self.faults_handled.load(Ordering::Relaxed),
            threats: self.threats.counts(),
            corrections: self.corrections.stats(),
            storage: self.storage.health_status(),
            last_health_check: self.last_health_check(),
        }
    }
}

/// Registry handle that restarts the periodic health loop. Holds the
/// orchestrator weakly: the orchestrator owns the registry through its
/// correction engine.
pub struct HealthLoopService(Weak<HealthOrchestrator>);

impl HealthLoopService {
    pub fn new(orchestrator: &Arc<HealthOrchestrator>) -> Self {
        Self(Arc::downgrade(orchestrator))
    }
}

#[async_trait]
impl Restartable for HealthLoopService {
    async fn restart(&self) -> Result<(), String> {
        let orchestrator = self
            .0
            .upgrade()
            .ok_or_else(|| "health orchestrator dropped".to_string())?;
        orchestrator.restart_loop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlPolicy;
    use crate::config::{CacheConfig, CircuitBreakerConfig, CorrectionConfig, RetryConfig, ThreatPolicy};
    use crate::events::EventBus;
    use crate::health::report::AggregateStatus;
    use crate::resilience::RetryCircuitExecutor;
    use crate::security::ThreatCategory;
    use crate::storage::entities::Severity;
    use crate::storage::InMemoryProvider;

    fn orchestrator(backend: InMemoryProvider) -> Arc<HealthOrchestrator> {
        let events = EventBus::new();
        let cache = Arc::new(MemoryCacheStore::new(&CacheConfig::default()));
        let storage = Arc::new(ResilientStorageFacade::new(
            Arc::new(backend),
            cache.clone(),
            RetryCircuitExecutor::new(&RetryConfig::default(), CircuitBreakerConfig::default()),
            TtlPolicy::new(&CacheConfig::default()),
        ));
        let threats = Arc::new(ThreatMitigationEngine::new(ThreatPolicy::default(), events.clone()));
        let corrections = Arc::new(
            ErrorCorrectionEngine::new(CorrectionConfig::default(), events)
                .with_database(storage.clone())
                .with_reclaimer(cache.clone()),
        );
        Arc::new(
            HealthOrchestrator::new(storage, cache.clone(), threats, corrections, HealthConfig::default())
                .with_memory_cache(cache),
        )
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let orch = orchestrator(InMemoryProvider::new());
        assert!(!orch.is_running());
        orch.start();
        assert!(orch.is_running());
        orch.shutdown().await;
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn test_health_loop_restarts_until_shutdown() {
        let orch = orchestrator(InMemoryProvider::new());
        let service = HealthLoopService::new(&orch);

        orch.start();
        service.restart().await.unwrap();
        assert!(orch.is_running());

        orch.shutdown().await;
        assert!(!orch.is_running());
        assert!(service.restart().await.is_err());

        drop(orch);
        assert!(service.restart().await.is_err());
    }

    #[tokio::test]
    async fn test_threat_report_is_routed() {
        let orch = orchestrator(InMemoryProvider::new());
        let ip = "198.51.100.4".parse().unwrap();
        let outcome = orch
            .report_threat(ThreatReport {
                source_ip: ip,
                category: ThreatCategory::BruteForce,
                severity: Severity::High,
                confidence: 99,
                indicators: vec![],
            })
            .await
            .unwrap();

        assert!(orch.threats().is_blocked(ip));
        assert!(outcome.latency_ms < 100);
        let status = orch.status();
        assert_eq!(status.threats_handled, 1);
        assert_eq!(status.active_incidents.threats, 0);
        assert_eq!(status.threats.blocked, 1);
    }

    #[tokio::test]
    async fn test_health_check_reports_unreachable_backend() {
        let backend = InMemoryProvider::new();
        let orch = orchestrator(backend.clone());

        let healthy = orch.trigger_health_check().await;
        assert_eq!(healthy.status, AggregateStatus::Healthy);

        backend.set_available(false);
        let report = orch.trigger_health_check().await;
        assert_eq!(report.status, AggregateStatus::Error);
        assert!(orch.last_health_check().is_some());
    }

    #[tokio::test]
    async fn test_degraded_backend_is_not_an_error() {
        let backend = InMemoryProvider::without_operations([crate::storage::Operation::ListAuditLogs]);
        let orch = orchestrator(backend);
        assert_eq!(orch.trigger_health_check().await.status, AggregateStatus::Degraded);
    }

    #[tokio::test]
    async fn test_unavailable_storage_error_routes_to_correction() {
        let orch = orchestrator(InMemoryProvider::new());
        let unavailable = StorageError::Unavailable {
            dependency: "database".into(),
        };
        let outcome = orch.report_storage_error(&unavailable).unwrap().await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.fallback_mode, Some(false));

        assert!(orch.report_storage_error(&StorageError::not_found("user", "u1")).is_none());
    }
}
