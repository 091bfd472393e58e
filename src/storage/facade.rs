//! Cache-aside, circuit-protected storage facade.
//!
//! ```text
//! read:  cache (fresh) → per-key lock → cache again → breaker(retry(backend))
//!        → populate under the scope fence if the generation is unchanged
//!        → open circuit: cache (stale) → not found / Unavailable
//! write: retry(backend) → delete key or patterns → bump generation
//!        → wait out in-flight populates (fence) → delete again
//! ```
//!
//! Scope gates exist only while a load for the scope is in flight, so the
//! coordination state stays bounded by concurrency, not by key count.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::cache::policy::{entity_key, list_key, list_pattern, lookup_key, lookup_pattern, TtlPolicy};
use crate::cache::store::{CacheStore, CacheStoreExt, GetOptions};
use crate::correction::hooks::DatabaseProbe;
use crate::observability::metrics;
use crate::resilience::{BreakerRejection, RetryCircuitExecutor, RetryContext};
use crate::storage::entities::*;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::provider::{Operation, PersistenceProvider};

/// Breaker key for the persistence backend.
pub const DATABASE: &str = "database";

const METRICS_ID: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
}

/// `{status, degradedMode, missingMethods}`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDocument {
    pub status: HealthLevel,
    pub degraded_mode: bool,
    pub missing_methods: Vec<&'static str>,
}

/// One read-through: where it is cached and what it means when the
/// dependency is gone and nothing stale is left.
struct Read<T> {
    class: EntityClass,
    key: String,
    scope: String,
    ctx: RetryContext,
    unavailable: fn(StorageError) -> StorageResult<T>,
}

fn absent<T>(_: StorageError) -> StorageResult<Option<T>> {
    Ok(None)
}

fn fail<T>(err: StorageError) -> StorageResult<T> {
    Err(err)
}

/// Orders cache population against invalidation for one scope (an entity
/// key, or a class's lists or lookups).
#[derive(Default)]
struct ScopeGate {
    generation: AtomicU64,
    fence: RwLock<()>,
}

/// What an invalidation removes from the cache.
#[derive(Clone, Copy)]
enum Evict<'a> {
    Key(&'a str),
    Pattern(&'a str),
}

fn list_scope(class: EntityClass) -> String {
    format!("{}:list", class.as_str())
}

fn lookup_scope(class: EntityClass, field: &str) -> String {
    format!("{}:by_{}", class.as_str(), field)
}

pub struct ResilientStorageFacade {
    backend: Arc<dyn PersistenceProvider>,
    cache: Arc<dyn CacheStore>,
    executor: RetryCircuitExecutor,
    policy: TtlPolicy,
    /// Critical operations the backend lacks.
    missing: BTreeSet<Operation>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    gates: DashMap<String, Arc<ScopeGate>>,
    db_fallback: AtomicBool,
}

impl ResilientStorageFacade {
    pub fn new(
        backend: Arc<dyn PersistenceProvider>,
        cache: Arc<dyn CacheStore>,
        executor: RetryCircuitExecutor,
        policy: TtlPolicy,
    ) -> Self {
        let supported: HashSet<Operation> = backend.supported_operations();
        let missing: BTreeSet<Operation> = Operation::CRITICAL
            .into_iter()
            .filter(|op| !supported.contains(op))
            .collect();

        if missing.is_empty() {
            tracing::info!("Storage facade ready");
        } else {
            tracing::warn!(
                missing = ?missing.iter().map(|op| op.name()).collect::<Vec<_>>(),
                "Backend lacks critical operations, entering degraded mode"
            );
        }

        Self {
            backend,
            cache,
            executor,
            policy,
            missing,
            inflight: DashMap::new(),
            gates: DashMap::new(),
            db_fallback: AtomicBool::new(false),
        }
    }

    pub fn executor(&self) -> &RetryCircuitExecutor {
        &self.executor
    }

    pub fn is_degraded(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn missing_methods(&self) -> Vec<&'static str> {
        self.missing.iter().map(|op| op.name()).collect()
    }

    pub fn health_status(&self) -> HealthDocument {
        let status = if self.db_fallback.load(Ordering::SeqCst) {
            HealthLevel::Critical
        } else if self.is_degraded() || self.executor.breakers().any_open() {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };
        HealthDocument {
            status,
            degraded_mode: self.is_degraded(),
            missing_methods: self.missing_methods(),
        }
    }

    /// Safe default for a missing critical operation.
    fn degraded<T: Default>(&self, op: Operation) -> Option<T> {
        if self.missing.contains(&op) {
            tracing::debug!(operation = op.name(), "Serving degraded-mode default");
            Some(T::default())
        } else {
            None
        }
    }

    fn enter_scope(&self, scope: &str) -> Arc<ScopeGate> {
        Arc::clone(self.gates.entry(scope.to_string()).or_default().value())
    }

    fn leave_scope(&self, scope: &str, gate: Arc<ScopeGate>) {
        drop(gate);
        self.gates.remove_if(scope, |_, g| Arc::strong_count(g) == 1);
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.inflight.entry(key.to_string()).or_default().value())
    }

    fn rejection_error(&self, operation: &'static str, rejection: BreakerRejection<StorageError>) -> StorageError {
        match rejection {
            BreakerRejection::Open => StorageError::Unavailable {
                dependency: DATABASE.to_string(),
            },
            BreakerRejection::Failed(last) => StorageError::RetriesExhausted {
                operation,
                attempts: self.executor.policy().max_attempts,
                last_error: last.to_string(),
            },
        }
    }

    async fn cached_read<T, F, Fut>(&self, read: Read<T>, load: F) -> StorageResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = StorageResult<T>> + Send,
    {
        let Read {
            class,
            key,
            scope,
            ctx,
            unavailable,
        } = read;
        let cacheable = self.policy.is_cacheable(class);

        if !cacheable {
            let operation = ctx.operation;
            return self
                .executor
                .execute_resilient(&ctx, load, |rejection| async move {
                    unavailable(self.rejection_error(operation, rejection))
                })
                .await;
        }

        if let Some(hit) = self.cache.get_as::<T>(&key, GetOptions::fresh()).await {
            metrics::record_cache_lookup(class.as_str(), true);
            return Ok(hit);
        }
        metrics::record_cache_lookup(class.as_str(), false);

        let lock = self.key_lock(&key);
        let guard = lock.lock().await;

        // Another caller may have loaded it while we waited.
        if let Some(hit) = self.cache.get_as::<T>(&key, GetOptions::fresh()).await {
            drop(guard);
            drop(lock);
            self.release_lock(&key);
            return Ok(hit);
        }

        let gate = self.enter_scope(&scope);
        let observed = gate.generation.load(Ordering::SeqCst);
        let key_ref = key.as_str();
        let ctx_ref = &ctx;
        let result = self
            .executor
            .execute_resilient(&ctx, load, |rejection| async move {
                if let Some(stale) = self.cache.get_as::<T>(key_ref, GetOptions::stale()).await {
                    tracing::warn!(key = key_ref, operation = ctx_ref.operation, "Serving stale cache entry");
                    return Ok(stale);
                }
                unavailable(self.rejection_error(ctx_ref.operation, rejection))
            })
            .await;

        if let Ok(value) = &result {
            self.populate(class, &key, &gate, observed, value).await;
        }
        self.leave_scope(&scope, gate);

        drop(guard);
        drop(lock);
        self.release_lock(&key);
        result
    }

    /// Write a freshly loaded value unless a mutation invalidated the scope
    /// after the load started. Absent results are not cached.
    async fn populate<T: Serialize>(&self, class: EntityClass, key: &str, gate: &ScopeGate, observed: u64, value: &T) {
        let json = match serde_json::to_value(value) {
            Ok(serde_json::Value::Null) => return,
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key, error = %e, "Skipping unserializable cache value");
                return;
            }
        };
        // Held across check and set: an invalidation waits for it, then
        // deletes whatever it wrote.
        let _fence = gate.fence.read().await;
        if gate.generation.load(Ordering::SeqCst) != observed {
            return;
        }
        self.cache.set(key, json, self.policy.set_options(class)).await;
    }

    async fn evict(&self, target: Evict<'_>) {
        match target {
            Evict::Key(key) => {
                self.cache.delete(key).await;
            }
            Evict::Pattern(pattern) => {
                self.cache.invalidate_pattern(pattern).await;
            }
        }
    }

    /// Evict, then fence off any load in flight for `scope` so that nothing
    /// it read before the write survives once this returns.
    async fn invalidate_scope(&self, scope: &str, target: Evict<'_>) {
        self.evict(target).await;
        let gate = self.gates.get(scope).map(|g| Arc::clone(g.value()));
        if let Some(gate) = gate {
            gate.generation.fetch_add(1, Ordering::SeqCst);
            drop(gate.fence.write().await);
            self.evict(target).await;
            self.leave_scope(scope, gate);
        }
    }

    fn release_lock(&self, key: &str) {
        self.inflight.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn write<T, F, Fut>(&self, ctx: RetryContext, op: F) -> StorageResult<T>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = StorageResult<T>> + Send,
    {
        self.executor
            .execute_with_retry(&ctx, op)
            .await
            .map_err(StorageError::from)
    }

    async fn invalidate_entity(&self, class: EntityClass, id: &str) {
        if !self.policy.is_cacheable(class) {
            return;
        }
        let key = entity_key(class, id);
        self.invalidate_scope(&key, Evict::Key(&key)).await;
    }

    async fn invalidate_lists(&self, class: EntityClass) {
        if !self.policy.is_cacheable(class) {
            return;
        }
        let pattern = list_pattern(class);
        self.invalidate_scope(&list_scope(class), Evict::Pattern(&pattern)).await;
    }

    async fn invalidate_lookups(&self, class: EntityClass, field: &str) {
        let pattern = lookup_pattern(class, field);
        self.invalidate_scope(&lookup_scope(class, field), Evict::Pattern(&pattern)).await;
    }

    async fn invalidate_metrics(&self) {
        self.invalidate_entity(EntityClass::SystemMetrics, METRICS_ID).await;
    }

    fn entity_read<T>(&self, class: EntityClass, id: &str, operation: &'static str) -> Read<Option<T>> {
        let key = entity_key(class, id);
        Read {
            class,
            scope: key.clone(),
            key,
            ctx: RetryContext::new(DATABASE, operation).with_entity(id),
            unavailable: absent,
        }
    }

    fn list_read<T>(&self, class: EntityClass, discriminator: &str, operation: &'static str) -> Read<Vec<T>> {
        Read {
            class,
            key: list_key(class, discriminator),
            scope: list_scope(class),
            ctx: RetryContext::new(DATABASE, operation),
            unavailable: fail,
        }
    }
}

#[async_trait]
impl PersistenceProvider for ResilientStorageFacade {
    /// Everything: missing critical operations are served from defaults.
    fn supported_operations(&self) -> HashSet<Operation> {
        let mut ops = self.backend.supported_operations();
        ops.extend(self.missing.iter().copied());
        ops
    }

    async fn ping(&self) -> StorageResult<()> {
        self.backend.ping().await
    }

    async fn get_user(&self, id: &str) -> StorageResult<Option<User>> {
        let backend = &self.backend;
        let read = self.entity_read(EntityClass::User, id, Operation::GetUser.name());
        self.cached_read(read, move || async move { backend.get_user(id).await })
            .await
    }

    async fn get_user_by_username(&self, username: &str) -> StorageResult<Option<User>> {
        let backend = &self.backend;
        let class = EntityClass::User;
        let read = Read {
            class,
            key: lookup_key(class, "username", username),
            scope: lookup_scope(class, "username"),
            ctx: RetryContext::new(DATABASE, Operation::GetUserByUsername.name()).with_entity(username),
            unavailable: absent,
        };
        self.cached_read(read, move || async move { backend.get_user_by_username(username).await })
            .await
    }

    async fn list_users(&self) -> StorageResult<Vec<User>> {
        let backend = &self.backend;
        let read = self.list_read(EntityClass::User, "all", Operation::ListUsers.name());
        self.cached_read(read, move || async move { backend.list_users().await })
            .await
    }

    async fn create_user(&self, user: NewUser) -> StorageResult<User> {
        let backend = &self.backend;
        let user = &user;
        let created = self
            .write(RetryContext::new(DATABASE, Operation::CreateUser.name()), move || async move {
                backend.create_user(user.clone()).await
            })
            .await?;
        self.invalidate_lists(EntityClass::User).await;
        self.invalidate_lookups(EntityClass::User, "username").await;
        self.invalidate_metrics().await;
        Ok(created)
    }

    async fn update_user(&self, id: &str, update: UserUpdate) -> StorageResult<User> {
        let backend = &self.backend;
        let update = &update;
        let ctx = RetryContext::new(DATABASE, Operation::UpdateUser.name()).with_entity(id);
        let updated = self
            .write(ctx, move || async move { backend.update_user(id, update.clone()).await })
            .await?;
        self.invalidate_entity(EntityClass::User, id).await;
        self.invalidate_lists(EntityClass::User).await;
        self.invalidate_lookups(EntityClass::User, "username").await;
        Ok(updated)
    }

    async fn delete_user(&self, id: &str) -> StorageResult<bool> {
        let backend = &self.backend;
        let ctx = RetryContext::new(DATABASE, Operation::DeleteUser.name()).with_entity(id);
        let deleted = self
            .write(ctx, move || async move { backend.delete_user(id).await })
            .await?;
        self.invalidate_entity(EntityClass::User, id).await;
        self.invalidate_lists(EntityClass::User).await;
        self.invalidate_lookups(EntityClass::User, "username").await;
        self.invalidate_metrics().await;
        Ok(deleted)
    }

    async fn get_document(&self, id: &str) -> StorageResult<Option<Document>> {
        let backend = &self.backend;
        let read = self.entity_read(EntityClass::Document, id, Operation::GetDocument.name());
        self.cached_read(read, move || async move { backend.get_document(id).await })
            .await
    }

    async fn list_documents(&self, filter: &DocumentFilter) -> StorageResult<Vec<Document>> {
        let backend = &self.backend;
        let read = self.list_read(
            EntityClass::Document,
            &filter.cache_discriminator(),
            Operation::ListDocuments.name(),
        );
        self.cached_read(read, move || async move { backend.list_documents(filter).await })
            .await
    }

    async fn create_document(&self, document: NewDocument) -> StorageResult<Document> {
        let backend = &self.backend;
        let document = &document;
        let created = self
            .write(RetryContext::new(DATABASE, Operation::CreateDocument.name()), move || async move {
                backend.create_document(document.clone()).await
            })
            .await?;
        self.invalidate_lists(EntityClass::Document).await;
        self.invalidate_metrics().await;
        Ok(created)
    }

    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> StorageResult<Document> {
        let backend = &self.backend;
        let ctx = RetryContext::new(DATABASE, Operation::UpdateDocumentStatus.name()).with_entity(id);
        let updated = self
            .write(ctx, move || async move { backend.update_document_status(id, status).await })
            .await?;
        self.invalidate_entity(EntityClass::Document, id).await;
        self.invalidate_lists(EntityClass::Document).await;
        self.invalidate_metrics().await;
        Ok(updated)
    }

    async fn delete_document(&self, id: &str) -> StorageResult<bool> {
        let backend = &self.backend;
        let ctx = RetryContext::new(DATABASE, Operation::DeleteDocument.name()).with_entity(id);
        let deleted = self
            .write(ctx, move || async move { backend.delete_document(id).await })
            .await?;
        self.invalidate_entity(EntityClass::Document, id).await;
        self.invalidate_lists(EntityClass::Document).await;
        self.invalidate_metrics().await;
        Ok(deleted)
    }

    async fn list_messages(&self, conversation_id: &str) -> StorageResult<Vec<Message>> {
        let backend = &self.backend;
        let read = self.list_read(EntityClass::Message, conversation_id, Operation::ListMessages.name());
        self.cached_read(read, move || async move { backend.list_messages(conversation_id).await })
            .await
    }

    async fn create_message(&self, message: NewMessage) -> StorageResult<Message> {
        let backend = &self.backend;
        let message = &message;
        let created = self
            .write(RetryContext::new(DATABASE, Operation::CreateMessage.name()), move || async move {
                backend.create_message(message.clone()).await
            })
            .await?;
        self.invalidate_lists(EntityClass::Message).await;
        Ok(created)
    }

    async fn list_security_events(&self, filter: &SecurityEventFilter) -> StorageResult<Vec<SecurityEvent>> {
        if let Some(fallback) = self.degraded(Operation::ListSecurityEvents) {
            return Ok(fallback);
        }
        let backend = &self.backend;
        let read = self.list_read(
            EntityClass::SecurityEvent,
            &filter.cache_discriminator(),
            Operation::ListSecurityEvents.name(),
        );
        self.cached_read(read, move || async move { backend.list_security_events(filter).await })
            .await
    }

    async fn create_security_event(&self, event: NewSecurityEvent) -> StorageResult<SecurityEvent> {
        let backend = &self.backend;
        let event = &event;
        let created = self
            .write(
                RetryContext::new(DATABASE, Operation::CreateSecurityEvent.name()),
                move || async move { backend.create_security_event(event.clone()).await },
            )
            .await?;
        self.invalidate_lists(EntityClass::SecurityEvent).await;
        self.invalidate_metrics().await;
        Ok(created)
    }

    async fn get_behavior_profile(&self, user_id: &str) -> StorageResult<Option<BehaviorProfile>> {
        let backend = &self.backend;
        let read = self.entity_read(EntityClass::BehaviorProfile, user_id, Operation::GetBehaviorProfile.name());
        self.cached_read(read, move || async move { backend.get_behavior_profile(user_id).await })
            .await
    }

    async fn upsert_behavior_profile(&self, profile: BehaviorProfile) -> StorageResult<BehaviorProfile> {
        let backend = &self.backend;
        let user_id = profile.user_id.clone();
        let profile = &profile;
        let ctx = RetryContext::new(DATABASE, Operation::UpsertBehaviorProfile.name()).with_entity(&user_id);
        let stored = self
            .write(ctx, move || async move { backend.upsert_behavior_profile(profile.clone()).await })
            .await?;
        self.invalidate_entity(EntityClass::BehaviorProfile, &user_id).await;
        Ok(stored)
    }

    async fn list_workflow_stages(&self, document_type: DocumentType) -> StorageResult<Vec<WorkflowStage>> {
        if let Some(fallback) = self.degraded(Operation::ListWorkflowStages) {
            return Ok(fallback);
        }
        let backend = &self.backend;
        let read = self.list_read(
            EntityClass::WorkflowStage,
            document_type.as_str(),
            Operation::ListWorkflowStages.name(),
        );
        self.cached_read(read, move || async move { backend.list_workflow_stages(document_type).await })
            .await
    }

    async fn get_fraud_alert(&self, id: &str) -> StorageResult<Option<FraudAlert>> {
        let backend = &self.backend;
        let read = self.entity_read(EntityClass::FraudAlert, id, Operation::GetFraudAlert.name());
        self.cached_read(read, move || async move { backend.get_fraud_alert(id).await })
            .await
    }

    async fn list_fraud_alerts(&self, user_id: Option<&str>) -> StorageResult<Vec<FraudAlert>> {
        if let Some(fallback) = self.degraded(Operation::ListFraudAlerts) {
            return Ok(fallback);
        }
        let backend = &self.backend;
        let read = self.list_read(
            EntityClass::FraudAlert,
            user_id.unwrap_or("*"),
            Operation::ListFraudAlerts.name(),
        );
        self.cached_read(read, move || async move { backend.list_fraud_alerts(user_id).await })
            .await
    }

    async fn create_fraud_alert(&self, alert: NewFraudAlert) -> StorageResult<FraudAlert> {
        let backend = &self.backend;
        let alert = &alert;
        let created = self
            .write(RetryContext::new(DATABASE, Operation::CreateFraudAlert.name()), move || async move {
                backend.create_fraud_alert(alert.clone()).await
            })
            .await?;
        self.invalidate_metrics().await;
        Ok(created)
    }

    async fn resolve_fraud_alert(&self, id: &str) -> StorageResult<FraudAlert> {
        let backend = &self.backend;
        let ctx = RetryContext::new(DATABASE, Operation::ResolveFraudAlert.name()).with_entity(id);
        let resolved = self
            .write(ctx, move || async move { backend.resolve_fraud_alert(id).await })
            .await?;
        self.invalidate_metrics().await;
        Ok(resolved)
    }

    async fn get_crypto_key(&self, id: &str) -> StorageResult<Option<CryptoKey>> {
        let backend = &self.backend;
        let read = self.entity_read(EntityClass::CryptoKey, id, Operation::GetCryptoKey.name());
        self.cached_read(read, move || async move { backend.get_crypto_key(id).await })
            .await
    }

    async fn create_crypto_key(&self, key: NewCryptoKey) -> StorageResult<CryptoKey> {
        let backend = &self.backend;
        let key = &key;
        self.write(RetryContext::new(DATABASE, Operation::CreateCryptoKey.name()), move || async move {
            backend.create_crypto_key(key.clone()).await
        })
        .await
    }

    async fn revoke_crypto_key(&self, id: &str) -> StorageResult<CryptoKey> {
        let backend = &self.backend;
        let ctx = RetryContext::new(DATABASE, Operation::RevokeCryptoKey.name()).with_entity(id);
        self.write(ctx, move || async move { backend.revoke_crypto_key(id).await })
            .await
    }

    async fn get_encrypted_artifact(&self, id: &str) -> StorageResult<Option<EncryptedArtifact>> {
        let backend = &self.backend;
        let read = self.entity_read(EntityClass::EncryptedArtifact, id, Operation::GetEncryptedArtifact.name());
        self.cached_read(read, move || async move { backend.get_encrypted_artifact(id).await })
            .await
    }

    async fn store_encrypted_artifact(&self, artifact: NewEncryptedArtifact) -> StorageResult<EncryptedArtifact> {
        let backend = &self.backend;
        let artifact = &artifact;
        self.write(
            RetryContext::new(DATABASE, Operation::StoreEncryptedArtifact.name()),
            move || async move { backend.store_encrypted_artifact(artifact.clone()).await },
        )
        .await
    }

    async fn list_audit_logs(&self, filter: &AuditLogFilter) -> StorageResult<Vec<AuditLog>> {
        if let Some(fallback) = self.degraded(Operation::ListAuditLogs) {
            return Ok(fallback);
        }
        let backend = &self.backend;
        let read = self.list_read(EntityClass::AuditLog, "filtered", Operation::ListAuditLogs.name());
        self.cached_read(read, move || async move { backend.list_audit_logs(filter).await })
            .await
    }

    async fn create_audit_log(&self, entry: NewAuditLog) -> StorageResult<AuditLog> {
        let backend = &self.backend;
        let entry = &entry;
        self.write(RetryContext::new(DATABASE, Operation::CreateAuditLog.name()), move || async move {
            backend.create_audit_log(entry.clone()).await
        })
        .await
    }

    async fn get_system_metrics(&self) -> StorageResult<SystemMetrics> {
        if let Some(fallback) = self.degraded(Operation::GetSystemMetrics) {
            return Ok(fallback);
        }
        let backend = &self.backend;
        let class = EntityClass::SystemMetrics;
        let key = entity_key(class, METRICS_ID);
        let read = Read {
            class,
            scope: key.clone(),
            key,
            ctx: RetryContext::new(DATABASE, Operation::GetSystemMetrics.name()),
            unavailable: fail,
        };
        self.cached_read(read, move || async move { backend.get_system_metrics().await })
            .await
    }
}

#[async_trait]
impl DatabaseProbe for ResilientStorageFacade {
    async fn reconnect(&self) -> Result<(), String> {
        self.backend.ping().await.map_err(|e| e.to_string())?;
        self.executor.breakers().reset(DATABASE);
        Ok(())
    }

    fn set_fallback_mode(&self, active: bool) {
        let was = self.db_fallback.swap(active, Ordering::SeqCst);
        if was != active {
            tracing::warn!(active, "Database fallback mode changed");
        }
    }

    fn fallback_mode(&self) -> bool {
        self.db_fallback.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::config::{CacheConfig, CircuitBreakerConfig};
    use crate::resilience::backoff::ExponentialBackoff;
    use crate::resilience::RetryPolicy;
    use crate::storage::memory::InMemoryProvider;
    use std::time::Duration;

    fn facade(backend: InMemoryProvider) -> (ResilientStorageFacade, Arc<MemoryCacheStore>) {
        let cache = Arc::new(MemoryCacheStore::new(&CacheConfig::default()));
        (facade_over(backend, cache.clone()), cache)
    }

    fn facade_over(backend: InMemoryProvider, cache: Arc<dyn CacheStore>) -> ResilientStorageFacade {
        let executor = RetryCircuitExecutor::with_policy(
            RetryPolicy::new(3, ExponentialBackoff::from_millis(1, 5)),
            CircuitBreakerConfig {
                failure_threshold: 3,
                window_secs: 60,
                cool_down_secs: 5,
                max_cool_down_secs: 60,
            },
        );
        ResilientStorageFacade::new(Arc::new(backend), cache, executor, TtlPolicy::new(&CacheConfig::default()))
    }

    /// A cache whose writes take a while to land.
    struct SlowCache {
        inner: MemoryCacheStore,
        delay: Duration,
    }

    #[async_trait]
    impl CacheStore for SlowCache {
        async fn get(&self, key: &str, opts: GetOptions) -> Option<serde_json::Value> {
            self.inner.get(key, opts).await
        }

        async fn set(&self, key: &str, value: serde_json::Value, opts: crate::cache::SetOptions) {
            tokio::time::sleep(self.delay).await;
            self.inner.set(key, value, opts).await;
            tokio::time::sleep(self.delay).await;
        }

        async fn delete(&self, key: &str) -> bool {
            self.inner.delete(key).await
        }

        async fn invalidate_pattern(&self, pattern: &str) -> usize {
            self.inner.invalidate_pattern(pattern).await
        }
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.into(),
            email: format!("{}@example.org", name),
            role: UserRole::Citizen,
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_backend() {
        let backend = InMemoryProvider::new();
        let (facade, _) = facade(backend.clone());
        let user = facade.create_user(new_user("lerato")).await.unwrap();

        facade.get_user(&user.id).await.unwrap();
        facade.get_user(&user.id).await.unwrap();
        assert_eq!(backend.calls_for(Operation::GetUser), 1);
    }

    #[tokio::test]
    async fn test_read_your_writes() {
        let backend = InMemoryProvider::new();
        let (facade, _) = facade(backend);
        let user = facade.create_user(new_user("sipho")).await.unwrap();
        assert_eq!(facade.get_user(&user.id).await.unwrap().unwrap().email, "sipho@example.org");
        assert!(facade.get_user_by_username("sipho").await.unwrap().is_some());

        facade
            .update_user(
                &user.id,
                UserUpdate {
                    email: Some("new@example.org".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let fresh = facade.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(fresh.email, "new@example.org");
        let by_name = facade.get_user_by_username("sipho").await.unwrap().unwrap();
        assert_eq!(by_name.email, "new@example.org");
    }

    #[tokio::test]
    async fn test_list_invalidated_by_create() {
        let backend = InMemoryProvider::new();
        let (facade, _) = facade(backend);
        assert!(facade.list_users().await.unwrap().is_empty());

        facade.create_user(new_user("a")).await.unwrap();
        assert_eq!(facade.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sensitive_classes_bypass_cache() {
        let backend = InMemoryProvider::new();
        let (facade, cache) = facade(backend.clone());
        let key = facade
            .create_crypto_key(NewCryptoKey {
                purpose: "signing".into(),
                algorithm: "ed25519".into(),
                wrapped_material: vec![1, 2, 3],
            })
            .await
            .unwrap();

        facade.get_crypto_key(&key.id).await.unwrap();
        facade.get_crypto_key(&key.id).await.unwrap();
        assert_eq!(backend.calls_for(Operation::GetCryptoKey), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_mode_defaults() {
        let backend = InMemoryProvider::without_operations([Operation::ListFraudAlerts, Operation::GetSystemMetrics]);
        let (facade, _) = facade(backend.clone());

        let doc = facade.health_status();
        assert_eq!(doc.status, HealthLevel::Degraded);
        assert!(doc.degraded_mode);
        assert_eq!(doc.missing_methods, vec!["list_fraud_alerts", "get_system_metrics"]);

        assert!(facade.list_fraud_alerts(None).await.unwrap().is_empty());
        assert_eq!(facade.get_system_metrics().await.unwrap(), SystemMetrics::default());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_non_critical_operation_fails() {
        let backend = InMemoryProvider::without_operations([Operation::ListMessages]);
        let (facade, _) = facade(backend);
        assert!(!facade.is_degraded());
        assert!(matches!(
            facade.list_messages("c1").await,
            Err(StorageError::Unsupported("list_messages"))
        ));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let backend = InMemoryProvider::new();
        let (facade, _) = facade(backend.clone());
        backend.fail_next(2);

        let user = facade.create_user(new_user("retry")).await.unwrap();
        assert_eq!(user.username, "retry");
        assert_eq!(backend.calls_for(Operation::CreateUser), 3);
    }

    #[tokio::test]
    async fn test_write_failure_surfaces() {
        let backend = InMemoryProvider::new();
        let (facade, _) = facade(backend.clone());
        backend.set_available(false);

        let err = facade.create_user(new_user("x")).await.unwrap_err();
        assert!(matches!(err, StorageError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_serves_stale() {
        let backend = InMemoryProvider::new();
        let (facade, _) = facade(backend.clone());
        let doc = facade
            .create_document(NewDocument {
                user_id: "u1".into(),
                document_type: DocumentType::Passport,
                reference_number: "P-1".into(),
            })
            .await
            .unwrap();
        facade.get_document(&doc.id).await.unwrap();

        // Expire the entry, then take the backend down.
        tokio::time::advance(Duration::from_secs(301)).await;
        backend.set_available(false);

        let served = facade.get_document(&doc.id).await.unwrap();
        assert_eq!(served.map(|d| d.id), Some(doc.id.clone()));

        // Nothing stale for an unknown id: not found.
        assert!(facade.get_document("unknown").await.unwrap().is_none());
        // Lists with nothing stale surface an error.
        assert!(facade.list_users().await.is_err());
    }

    #[tokio::test]
    async fn test_database_probe() {
        let backend = InMemoryProvider::new();
        let (facade, _) = facade(backend.clone());

        backend.set_available(false);
        assert!(facade.reconnect().await.is_err());
        facade.set_fallback_mode(true);
        assert_eq!(facade.health_status().status, HealthLevel::Critical);

        backend.set_available(true);
        facade.reconnect().await.unwrap();
        facade.set_fallback_mode(false);
        assert_eq!(facade.health_status().status, HealthLevel::Healthy);
    }

    #[tokio::test]
    async fn test_concurrent_misses_load_once() {
        let backend = InMemoryProvider::new();
        backend.set_latency(Duration::from_millis(20));
        let (facade, _) = facade(backend.clone());
        let facade = Arc::new(facade);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let facade = facade.clone();
                tokio::spawn(async move { facade.list_workflow_stages(DocumentType::Passport).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(backend.calls_for(Operation::ListWorkflowStages), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_waits_out_slow_populate() {
        let backend = InMemoryProvider::new();
        let cache = Arc::new(SlowCache {
            inner: MemoryCacheStore::new(&CacheConfig::default()),
            delay: Duration::from_millis(30),
        });
        let facade = Arc::new(facade_over(backend, cache));
        let user = facade.create_user(new_user("old")).await.unwrap();

        // This reader loads the old row and is still writing it to the cache
        // when the update lands.
        let reader = {
            let facade = facade.clone();
            let id = user.id.clone();
            tokio::spawn(async move { facade.get_user(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        facade
            .update_user(
                &user.id,
                UserUpdate {
                    email: Some("new@example.org".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let after = facade.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(after.email, "new@example.org");
        reader.await.unwrap().unwrap();
        let later = facade.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(later.email, "new@example.org");
    }

    #[tokio::test]
    async fn test_scope_gates_released() {
        let backend = InMemoryProvider::new();
        let (facade, _) = facade(backend);
        for i in 0..200 {
            let user = facade.create_user(new_user(&format!("u{}", i))).await.unwrap();
            facade.get_user(&user.id).await.unwrap();
            facade.list_users().await.unwrap();
            facade.delete_user(&user.id).await.unwrap();
        }
        assert!(facade.gates.is_empty());
        assert!(facade.inflight.is_empty());
    }
}
