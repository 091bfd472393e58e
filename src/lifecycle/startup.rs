//! Component wiring.

use std::sync::Arc;

use crate::cache::{MemoryCacheStore, TtlPolicy};
use crate::config::ResilienceConfig;
use crate::correction::{ErrorCorrectionEngine, ServiceRegistry};
use crate::events::EventBus;
use crate::health::{HealthLoopService, HealthOrchestrator, HEALTH_LOOP};
use crate::resilience::RetryCircuitExecutor;
use crate::security::ThreatMitigationEngine;
use crate::storage::{PersistenceProvider, ResilientStorageFacade};

/// Every long-lived component, built once and shared as `Arc`s.
pub struct Components {
    pub events: EventBus,
    pub cache: Arc<MemoryCacheStore>,
    pub storage: Arc<ResilientStorageFacade>,
    pub threats: Arc<ThreatMitigationEngine>,
    pub corrections: Arc<ErrorCorrectionEngine>,
    pub services: ServiceRegistry,
    pub orchestrator: Arc<HealthOrchestrator>,
}

impl Components {
    pub fn build(config: &ResilienceConfig, backend: Arc<dyn PersistenceProvider>) -> Self {
        let events = EventBus::new();
        let cache = Arc::new(MemoryCacheStore::new(&config.cache));

        let executor = RetryCircuitExecutor::new(&config.retry, config.circuit_breaker.clone());
        let storage = Arc::new(ResilientStorageFacade::new(
            backend,
            cache.clone(),
            executor,
            TtlPolicy::new(&config.cache),
        ));

        let threats = Arc::new(ThreatMitigationEngine::new(config.threat.clone(), events.clone()));

        let services = ServiceRegistry::new();
        let corrections = Arc::new(
            ErrorCorrectionEngine::new(config.correction.clone(), events.clone())
                .with_database(storage.clone())
                .with_reclaimer(cache.clone())
                .with_supervisor(Arc::new(services.clone())),
        );

        let orchestrator = Arc::new(
            HealthOrchestrator::new(
                storage.clone(),
                cache.clone(),
                threats.clone(),
                corrections.clone(),
                config.health.clone(),
            )
            .with_memory_cache(cache.clone()),
        );

        // Embedders register their own services next to this one.
        services.register(HEALTH_LOOP, Arc::new(HealthLoopService::new(&orchestrator)));

        tracing::info!(
            degraded = storage.is_degraded(),
            services = services.len(),
            max_cache_entries = config.cache.max_entries,
            "Components initialized"
        );

        Self {
            events,
            cache,
            storage,
            threats,
            corrections,
            services,
            orchestrator,
        }
    }
}
