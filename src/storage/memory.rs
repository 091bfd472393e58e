//! In-memory persistence backend.
//!
//! Backs the daemon's standalone mode and the test suites. Faults can be
//! injected at runtime: fail the next N calls, simulate a full outage, add
//! latency, or build it without some operations.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::clock::unix_millis;
use crate::storage::entities::*;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::provider::{Operation, PersistenceProvider};

#[derive(Debug, Default)]
struct Faults {
    fail_next: AtomicU32,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

/// Sharded in-memory tables implementing the full persistence contract.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    users: Arc<DashMap<String, User>>,
    documents: Arc<DashMap<String, Document>>,
    messages: Arc<DashMap<String, Message>>,
    security_events: Arc<DashMap<String, SecurityEvent>>,
    profiles: Arc<DashMap<String, BehaviorProfile>>,
    stages: Arc<DashMap<String, WorkflowStage>>,
    fraud_alerts: Arc<DashMap<String, FraudAlert>>,
    crypto_keys: Arc<DashMap<String, CryptoKey>>,
    artifacts: Arc<DashMap<String, EncryptedArtifact>>,
    audit_logs: Arc<DashMap<String, AuditLog>>,

    missing: Arc<HashSet<Operation>>,
    faults: Arc<Faults>,
    calls: Arc<DashMap<Operation, u64>>,
    total_calls: Arc<AtomicU64>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend that lacks the given operations.
    pub fn without_operations(ops: impl IntoIterator<Item = Operation>) -> Self {
        Self {
            missing: Arc::new(ops.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Fail the next `n` calls with a retryable backend error.
    pub fn fail_next(&self, n: u32) {
        self.faults.fail_next.store(n, Ordering::SeqCst);
    }

    /// Simulate a full outage (every call and ping fails) or recovery.
    pub fn set_available(&self, available: bool) {
        self.faults.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.faults
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Total backend calls made so far (pings excluded).
    pub fn calls(&self) -> u64 {
        self.total_calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, op: Operation) -> u64 {
        self.calls.get(&op).map_or(0, |c| *c)
    }

    /// Seed a workflow stage catalog entry.
    pub fn seed_stage(&self, stage: WorkflowStage) {
        self.stages.insert(stage.id.clone(), stage);
    }

    async fn enter(&self, op: Operation) -> StorageResult<()> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls.entry(op).or_insert(0) += 1;

        let latency = self.faults.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.missing.contains(&op) {
            return Err(StorageError::Unsupported(op.name()));
        }
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("connection refused".into()));
        }
        let injected = self
            .faults
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Backend(format!("injected failure in {}", op.name())));
        }
        Ok(())
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn limited<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(n) = limit {
        items.truncate(n);
    }
    items
}

#[async_trait]
impl PersistenceProvider for InMemoryProvider {
    fn supported_operations(&self) -> HashSet<Operation> {
        Operation::ALL
            .into_iter()
            .filter(|op| !self.missing.contains(op))
            .collect()
    }

    async fn ping(&self) -> StorageResult<()> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("connection refused".into()));
        }
        Ok(())
    }

    async fn get_user(&self, id: &str) -> StorageResult<Option<User>> {
        self.enter(Operation::GetUser).await?;
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    async fn get_user_by_username(&self, username: &str) -> StorageResult<Option<User>> {
        self.enter(Operation::GetUserByUsername).await?;
        Ok(self
            .users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.clone()))
    }

    async fn list_users(&self) -> StorageResult<Vec<User>> {
        self.enter(Operation::ListUsers).await?;
        let mut users: Vec<User> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn create_user(&self, user: NewUser) -> StorageResult<User> {
        self.enter(Operation::CreateUser).await?;
        if user.username.is_empty() {
            return Err(StorageError::Invalid("username must not be empty".into()));
        }
        if self.users.iter().any(|u| u.username == user.username) {
            return Err(StorageError::Invalid(format!("username '{}' taken", user.username)));
        }
        let created = User {
            id: new_id(),
            username: user.username,
            email: user.email,
            role: user.role,
            is_active: true,
            created_at: unix_millis(),
        };
        self.users.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn update_user(&self, id: &str, update: UserUpdate) -> StorageResult<User> {
        self.enter(Operation::UpdateUser).await?;
        let mut user = self
            .users
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("user", id))?;
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(active) = update.is_active {
            user.is_active = active;
        }
        Ok(user.clone())
    }

    async fn delete_user(&self, id: &str) -> StorageResult<bool> {
        self.enter(Operation::DeleteUser).await?;
        Ok(self.users.remove(id).is_some())
    }

    async fn get_document(&self, id: &str) -> StorageResult<Option<Document>> {
        self.enter(Operation::GetDocument).await?;
        Ok(self.documents.get(id).map(|d| d.clone()))
    }

    async fn list_documents(&self, filter: &DocumentFilter) -> StorageResult<Vec<Document>> {
        self.enter(Operation::ListDocuments).await?;
        let mut docs: Vec<Document> = self
            .documents
            .iter()
            .filter(|d| filter.matches(d))
            .map(|d| d.clone())
            .collect();
        docs.sort_by_key(|d| d.created_at);
        Ok(docs)
    }

    async fn create_document(&self, document: NewDocument) -> StorageResult<Document> {
        self.enter(Operation::CreateDocument).await?;
        let now = unix_millis();
        let created = Document {
            id: new_id(),
            user_id: document.user_id,
            document_type: document.document_type,
            status: DocumentStatus::Submitted,
            reference_number: document.reference_number,
            created_at: now,
            updated_at: now,
        };
        self.documents.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> StorageResult<Document> {
        self.enter(Operation::UpdateDocumentStatus).await?;
        let mut doc = self
            .documents
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("document", id))?;
        doc.status = status;
        doc.updated_at = unix_millis();
        Ok(doc.clone())
    }

    async fn delete_document(&self, id: &str) -> StorageResult<bool> {
        self.enter(Operation::DeleteDocument).await?;
        Ok(self.documents.remove(id).is_some())
    }

    async fn list_messages(&self, conversation_id: &str) -> StorageResult<Vec<Message>> {
        self.enter(Operation::ListMessages).await?;
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.clone())
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn create_message(&self, message: NewMessage) -> StorageResult<Message> {
        self.enter(Operation::CreateMessage).await?;
        let created = Message {
            id: new_id(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            body: message.body,
            created_at: unix_millis(),
        };
        self.messages.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn list_security_events(&self, filter: &SecurityEventFilter) -> StorageResult<Vec<SecurityEvent>> {
        self.enter(Operation::ListSecurityEvents).await?;
        let mut events: Vec<SecurityEvent> = self
            .security_events
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| e.clone())
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(limited(events, filter.limit))
    }

    async fn create_security_event(&self, event: NewSecurityEvent) -> StorageResult<SecurityEvent> {
        self.enter(Operation::CreateSecurityEvent).await?;
        let created = SecurityEvent {
            id: new_id(),
            user_id: event.user_id,
            event_type: event.event_type,
            severity: event.severity,
            source_ip: event.source_ip,
            details: event.details,
            created_at: unix_millis(),
        };
        self.security_events.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get_behavior_profile(&self, user_id: &str) -> StorageResult<Option<BehaviorProfile>> {
        self.enter(Operation::GetBehaviorProfile).await?;
        Ok(self.profiles.get(user_id).map(|p| p.clone()))
    }

    async fn upsert_behavior_profile(&self, mut profile: BehaviorProfile) -> StorageResult<BehaviorProfile> {
        self.enter(Operation::UpsertBehaviorProfile).await?;
        profile.updated_at = unix_millis();
        self.profiles.insert(profile.user_id.clone(), profile.clone());
        Ok(profile)
    }

    async fn list_workflow_stages(&self, document_type: DocumentType) -> StorageResult<Vec<WorkflowStage>> {
        self.enter(Operation::ListWorkflowStages).await?;
        let mut stages: Vec<WorkflowStage> = self
            .stages
            .iter()
            .filter(|s| s.document_type == document_type)
            .map(|s| s.clone())
            .collect();
        stages.sort_by_key(|s| s.order);
        Ok(stages)
    }

    async fn get_fraud_alert(&self, id: &str) -> StorageResult<Option<FraudAlert>> {
        self.enter(Operation::GetFraudAlert).await?;
        Ok(self.fraud_alerts.get(id).map(|a| a.clone()))
    }

    async fn list_fraud_alerts(&self, user_id: Option<&str>) -> StorageResult<Vec<FraudAlert>> {
        self.enter(Operation::ListFraudAlerts).await?;
        let mut alerts: Vec<FraudAlert> = self
            .fraud_alerts
            .iter()
            .filter(|a| user_id.map_or(true, |u| a.user_id == u))
            .map(|a| a.clone())
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    async fn create_fraud_alert(&self, alert: NewFraudAlert) -> StorageResult<FraudAlert> {
        self.enter(Operation::CreateFraudAlert).await?;
        let created = FraudAlert {
            id: new_id(),
            user_id: alert.user_id,
            alert_type: alert.alert_type,
            risk_score: alert.risk_score,
            resolved: false,
            created_at: unix_millis(),
        };
        self.fraud_alerts.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn resolve_fraud_alert(&self, id: &str) -> StorageResult<FraudAlert> {
        self.enter(Operation::ResolveFraudAlert).await?;
        let mut alert = self
            .fraud_alerts
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("fraud_alert", id))?;
        alert.resolved = true;
        Ok(alert.clone())
    }

    async fn get_crypto_key(&self, id: &str) -> StorageResult<Option<CryptoKey>> {
        self.enter(Operation::GetCryptoKey).await?;
        Ok(self.crypto_keys.get(id).map(|k| k.clone()))
    }

    async fn create_crypto_key(&self, key: NewCryptoKey) -> StorageResult<CryptoKey> {
        self.enter(Operation::CreateCryptoKey).await?;
        let created = CryptoKey {
            id: new_id(),
            purpose: key.purpose,
            algorithm: key.algorithm,
            wrapped_material: key.wrapped_material,
            status: KeyStatus::Active,
            created_at: unix_millis(),
        };
        self.crypto_keys.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn revoke_crypto_key(&self, id: &str) -> StorageResult<CryptoKey> {
        self.enter(Operation::RevokeCryptoKey).await?;
        let mut key = self
            .crypto_keys
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("crypto_key", id))?;
        key.status = KeyStatus::Revoked;
        Ok(key.clone())
    }

    async fn get_encrypted_artifact(&self, id: &str) -> StorageResult<Option<EncryptedArtifact>> {
        self.enter(Operation::GetEncryptedArtifact).await?;
        Ok(self.artifacts.get(id).map(|a| a.clone()))
    }

    async fn store_encrypted_artifact(&self, artifact: NewEncryptedArtifact) -> StorageResult<EncryptedArtifact> {
        self.enter(Operation::StoreEncryptedArtifact).await?;
        let created = EncryptedArtifact {
            id: new_id(),
            owner_id: artifact.owner_id,
            key_id: artifact.key_id,
            ciphertext: artifact.ciphertext,
            created_at: unix_millis(),
        };
        self.artifacts.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn list_audit_logs(&self, filter: &AuditLogFilter) -> StorageResult<Vec<AuditLog>> {
        self.enter(Operation::ListAuditLogs).await?;
        let mut logs: Vec<AuditLog> = self
            .audit_logs
            .iter()
            .filter(|l| filter.matches(l))
            .map(|l| l.clone())
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(limited(logs, filter.limit))
    }

    async fn create_audit_log(&self, entry: NewAuditLog) -> StorageResult<AuditLog> {
        self.enter(Operation::CreateAuditLog).await?;
        let created = AuditLog {
            id: new_id(),
            actor_id: entry.actor_id,
            action: entry.action,
            entity: entry.entity,
            entity_id: entry.entity_id,
            created_at: unix_millis(),
        };
        self.audit_logs.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get_system_metrics(&self) -> StorageResult<SystemMetrics> {
        self.enter(Operation::GetSystemMetrics).await?;
        let day_ago = unix_millis().saturating_sub(24 * 3600 * 1000);
        Ok(SystemMetrics {
            total_users: self.users.len() as u64,
            total_documents: self.documents.len() as u64,
            pending_documents: self
                .documents
                .iter()
                .filter(|d| matches!(d.status, DocumentStatus::Submitted | DocumentStatus::UnderReview))
                .count() as u64,
            open_fraud_alerts: self.fraud_alerts.iter().filter(|a| !a.resolved).count() as u64,
            security_events_24h: self
                .security_events
                .iter()
                .filter(|e| e.created_at >= day_ago)
                .count() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.into(),
            email: format!("{}@example.org", name),
            role: UserRole::Citizen,
        }
    }

    #[tokio::test]
    async fn test_user_crud() {
        let backend = InMemoryProvider::new();
        let user = backend.create_user(new_user("thandi")).await.unwrap();

        let fetched = backend.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(fetched.username, "thandi");

        let updated = backend
            .update_user(&user.id, UserUpdate { is_active: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert!(!updated.is_active);

        assert!(backend.delete_user(&user.id).await.unwrap());
        assert!(backend.get_user(&user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_next_injects_backend_errors() {
        let backend = InMemoryProvider::new();
        backend.fail_next(2);
        assert!(matches!(backend.list_users().await, Err(StorageError::Backend(_))));
        assert!(matches!(backend.list_users().await, Err(StorageError::Backend(_))));
        assert!(backend.list_users().await.is_ok());
        assert_eq!(backend.calls_for(Operation::ListUsers), 3);
    }

    #[tokio::test]
    async fn test_missing_operations_are_declared() {
        let backend = InMemoryProvider::without_operations([Operation::ListFraudAlerts]);
        assert!(!backend.supported_operations().contains(&Operation::ListFraudAlerts));
        assert!(matches!(
            backend.list_fraud_alerts(None).await,
            Err(StorageError::Unsupported("list_fraud_alerts"))
        ));
    }

    #[tokio::test]
    async fn test_outage_fails_ping() {
        let backend = InMemoryProvider::new();
        backend.set_available(false);
        assert!(backend.ping().await.is_err());
        backend.set_available(true);
        assert!(backend.ping().await.is_ok());
    }
}
