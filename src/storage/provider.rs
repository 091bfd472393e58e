//! Persistence provider contract.
//!
//! One async operation per entity kind. Implementations do no caching of
//! their own. A backend that lacks an operation says so through
//! `supported_operations` and returns `StorageError::Unsupported` if called.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;

use crate::storage::entities::*;
use crate::storage::error::StorageResult;

/// Every operation of the persistence contract, by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    GetUser,
    GetUserByUsername,
    ListUsers,
    CreateUser,
    UpdateUser,
    DeleteUser,
    GetDocument,
    ListDocuments,
    CreateDocument,
    UpdateDocumentStatus,
    DeleteDocument,
    ListMessages,
    CreateMessage,
    ListSecurityEvents,
    CreateSecurityEvent,
    GetBehaviorProfile,
    UpsertBehaviorProfile,
    ListWorkflowStages,
    GetFraudAlert,
    ListFraudAlerts,
    CreateFraudAlert,
    ResolveFraudAlert,
    GetCryptoKey,
    CreateCryptoKey,
    RevokeCryptoKey,
    GetEncryptedArtifact,
    StoreEncryptedArtifact,
    ListAuditLogs,
    CreateAuditLog,
    GetSystemMetrics,
}

impl Operation {
    pub const ALL: [Operation; 30] = [
        Operation::GetUser,
        Operation::GetUserByUsername,
        Operation::ListUsers,
        Operation::CreateUser,
        Operation::UpdateUser,
        Operation::DeleteUser,
        Operation::GetDocument,
        Operation::ListDocuments,
        Operation::CreateDocument,
        Operation::UpdateDocumentStatus,
        Operation::DeleteDocument,
        Operation::ListMessages,
        Operation::CreateMessage,
        Operation::ListSecurityEvents,
        Operation::CreateSecurityEvent,
        Operation::GetBehaviorProfile,
        Operation::UpsertBehaviorProfile,
        Operation::ListWorkflowStages,
        Operation::GetFraudAlert,
        Operation::ListFraudAlerts,
        Operation::CreateFraudAlert,
        Operation::ResolveFraudAlert,
        Operation::GetCryptoKey,
        Operation::CreateCryptoKey,
        Operation::RevokeCryptoKey,
        Operation::GetEncryptedArtifact,
        Operation::StoreEncryptedArtifact,
        Operation::ListAuditLogs,
        Operation::CreateAuditLog,
        Operation::GetSystemMetrics,
    ];

    /// Operations the facade cannot run without. If the backend lacks one,
    /// the facade enters degraded mode and serves a safe default instead.
    /// All of them are reads: a write can never be faked.
    pub const CRITICAL: [Operation; 5] = [
        Operation::ListSecurityEvents,
        Operation::ListFraudAlerts,
        Operation::ListAuditLogs,
        Operation::ListWorkflowStages,
        Operation::GetSystemMetrics,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::GetUser => "get_user",
            Operation::GetUserByUsername => "get_user_by_username",
            Operation::ListUsers => "list_users",
            Operation::CreateUser => "create_user",
            Operation::UpdateUser => "update_user",
            Operation::DeleteUser => "delete_user",
            Operation::GetDocument => "get_document",
            Operation::ListDocuments => "list_documents",
            Operation::CreateDocument => "create_document",
            Operation::UpdateDocumentStatus => "update_document_status",
            Operation::DeleteDocument => "delete_document",
            Operation::ListMessages => "list_messages",
            Operation::CreateMessage => "create_message",
            Operation::ListSecurityEvents => "list_security_events",
            Operation::CreateSecurityEvent => "create_security_event",
            Operation::GetBehaviorProfile => "get_behavior_profile",
            Operation::UpsertBehaviorProfile => "upsert_behavior_profile",
            Operation::ListWorkflowStages => "list_workflow_stages",
            Operation::GetFraudAlert => "get_fraud_alert",
            Operation::ListFraudAlerts => "list_fraud_alerts",
            Operation::CreateFraudAlert => "create_fraud_alert",
            Operation::ResolveFraudAlert => "resolve_fraud_alert",
            Operation::GetCryptoKey => "get_crypto_key",
            Operation::CreateCryptoKey => "create_crypto_key",
            Operation::RevokeCryptoKey => "revoke_crypto_key",
            Operation::GetEncryptedArtifact => "get_encrypted_artifact",
            Operation::StoreEncryptedArtifact => "store_encrypted_artifact",
            Operation::ListAuditLogs => "list_audit_logs",
            Operation::CreateAuditLog => "create_audit_log",
            Operation::GetSystemMetrics => "get_system_metrics",
        }
    }

    pub fn all() -> HashSet<Operation> {
        Operation::ALL.into_iter().collect()
    }
}

/// Full CRUD over the portal's domain entities.
#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    /// Operations this backend implements. Defaults to all of them.
    fn supported_operations(&self) -> HashSet<Operation> {
        Operation::all()
    }

    /// Cheap liveness check (a connection probe for real databases).
    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn get_user(&self, id: &str) -> StorageResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> StorageResult<Option<User>>;
    async fn list_users(&self) -> StorageResult<Vec<User>>;
    async fn create_user(&self, user: NewUser) -> StorageResult<User>;
    async fn update_user(&self, id: &str, update: UserUpdate) -> StorageResult<User>;
    async fn delete_user(&self, id: &str) -> StorageResult<bool>;

    async fn get_document(&self, id: &str) -> StorageResult<Option<Document>>;
    async fn list_documents(&self, filter: &DocumentFilter) -> StorageResult<Vec<Document>>;
    async fn create_document(&self, document: NewDocument) -> StorageResult<Document>;
    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> StorageResult<Document>;
    async fn delete_document(&self, id: &str) -> StorageResult<bool>;

    async fn list_messages(&self, conversation_id: &str) -> StorageResult<Vec<Message>>;
    async fn create_message(&self, message: NewMessage) -> StorageResult<Message>;

    async fn list_security_events(&self, filter: &SecurityEventFilter) -> StorageResult<Vec<SecurityEvent>>;
    async fn create_security_event(&self, event: NewSecurityEvent) -> StorageResult<SecurityEvent>;

    async fn get_behavior_profile(&self, user_id: &str) -> StorageResult<Option<BehaviorProfile>>;
    async fn upsert_behavior_profile(&self, profile: BehaviorProfile) -> StorageResult<BehaviorProfile>;

    async fn list_workflow_stages(&self, document_type: DocumentType) -> StorageResult<Vec<WorkflowStage>>;

    async fn get_fraud_alert(&self, id: &str) -> StorageResult<Option<FraudAlert>>;
    async fn list_fraud_alerts(&self, user_id: Option<&str>) -> StorageResult<Vec<FraudAlert>>;
    async fn create_fraud_alert(&self, alert: NewFraudAlert) -> StorageResult<FraudAlert>;
    async fn resolve_fraud_alert(&self, id: &str) -> StorageResult<FraudAlert>;

    async fn get_crypto_key(&self, id: &str) -> StorageResult<Option<CryptoKey>>;
    async fn create_crypto_key(&self, key: NewCryptoKey) -> StorageResult<CryptoKey>;
    async fn revoke_crypto_key(&self, id: &str) -> StorageResult<CryptoKey>;

    async fn get_encrypted_artifact(&self, id: &str) -> StorageResult<Option<EncryptedArtifact>>;
    async fn store_encrypted_artifact(&self, artifact: NewEncryptedArtifact) -> StorageResult<EncryptedArtifact>;

    async fn list_audit_logs(&self, filter: &AuditLogFilter) -> StorageResult<Vec<AuditLog>>;
    async fn create_audit_log(&self, entry: NewAuditLog) -> StorageResult<AuditLog>;

    async fn get_system_metrics(&self) -> StorageResult<SystemMetrics>;
}
