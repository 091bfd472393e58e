//! Domain entities and their request shapes.
//!
//! Every filter and mutation is a closed struct; nothing is passed around as
//! free-form JSON.

use serde::{Deserialize, Serialize};

/// Entity classes, used for cache keys and TTL selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    User,
    Document,
    Message,
    SecurityEvent,
    BehaviorProfile,
    WorkflowStage,
    FraudAlert,
    CryptoKey,
    EncryptedArtifact,
    AuditLog,
    SystemMetrics,
}

impl EntityClass {
    /// Cache key prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityClass::User => "user",
            EntityClass::Document => "document",
            EntityClass::Message => "message",
            EntityClass::SecurityEvent => "security_event",
            EntityClass::BehaviorProfile => "behavior_profile",
            EntityClass::WorkflowStage => "workflow_stage",
            EntityClass::FraudAlert => "fraud_alert",
            EntityClass::CryptoKey => "crypto_key",
            EntityClass::EncryptedArtifact => "encrypted_artifact",
            EntityClass::AuditLog => "audit_log",
            EntityClass::SystemMetrics => "system_metrics",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Citizen,
    Officer,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    BirthCertificate,
    DeathCertificate,
    MarriageCertificate,
    Passport,
    IdentityDocument,
    WorkPermit,
    Visa,
    ResidencePermit,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::BirthCertificate => "birth_certificate",
            DocumentType::DeathCertificate => "death_certificate",
            DocumentType::MarriageCertificate => "marriage_certificate",
            DocumentType::Passport => "passport",
            DocumentType::IdentityDocument => "identity_document",
            DocumentType::WorkPermit => "work_permit",
            DocumentType::Visa => "visa",
            DocumentType::ResidencePermit => "residence_permit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Submitted,
    UnderReview,
    Approved,
    Issued,
    Rejected,
    Revoked,
}

/// An issued (or in-progress) document of any type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub document_type: DocumentType,
    pub status: DocumentStatus,
    pub reference_number: String,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub user_id: String,
    pub document_type: DocumentType,
    pub reference_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    pub user_id: Option<String>,
    pub document_type: Option<DocumentType>,
    pub status: Option<DocumentStatus>,
}

impl DocumentFilter {
    pub fn matches(&self, doc: &Document) -> bool {
        self.user_id.as_ref().map_or(true, |u| *u == doc.user_id)
            && self.document_type.map_or(true, |t| t == doc.document_type)
            && self.status.map_or(true, |s| s == doc.status)
    }

    /// Stable discriminator for list cache keys.
    pub fn cache_discriminator(&self) -> String {
        format!(
            "u={}|t={}|s={}",
            self.user_id.as_deref().unwrap_or("*"),
            self.document_type.map_or("*", |t| t.as_str()),
            self.status.map_or("*".to_string(), |s| format!("{:?}", s)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub user_id: Option<String>,
    pub event_type: String,
    pub severity: Severity,
    pub source_ip: Option<String>,
    pub details: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSecurityEvent {
    pub user_id: Option<String>,
    pub event_type: String,
    pub severity: Severity,
    pub source_ip: Option<String>,
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEventFilter {
    pub user_id: Option<String>,
    pub min_severity: Option<Severity>,
    pub limit: Option<usize>,
}

impl SecurityEventFilter {
    pub fn matches(&self, event: &SecurityEvent) -> bool {
        self.user_id
            .as_ref()
            .map_or(true, |u| event.user_id.as_ref() == Some(u))
            && self.min_severity.map_or(true, |s| event.severity >= s)
    }

    pub fn cache_discriminator(&self) -> String {
        format!(
            "u={}|sev={}|n={}",
            self.user_id.as_deref().unwrap_or("*"),
            self.min_severity.map_or("*".to_string(), |s| format!("{:?}", s)),
            self.limit.map_or("*".to_string(), |n| n.to_string()),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorProfile {
    pub user_id: String,
    pub typical_login_hours: Vec<u8>,
    pub known_ips: Vec<String>,
    pub risk_baseline: f64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub id: String,
    pub document_type: DocumentType,
    pub name: String,
    pub order: u32,
    pub requires_officer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAlert {
    pub id: String,
    pub user_id: String,
    pub alert_type: String,
    pub risk_score: u32,
    pub resolved: bool,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFraudAlert {
    pub user_id: String,
    pub alert_type: String,
    pub risk_score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Rotated,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoKey {
    pub id: String,
    pub purpose: String,
    pub algorithm: String,
    /// Wrapped key material; never cached.
    pub wrapped_material: Vec<u8>,
    pub status: KeyStatus,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCryptoKey {
    pub purpose: String,
    pub algorithm: String,
    pub wrapped_material: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedArtifact {
    pub id: String,
    pub owner_id: String,
    pub key_id: String,
    pub ciphertext: Vec<u8>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEncryptedArtifact {
    pub owner_id: String,
    pub key_id: String,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub actor_id: String,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditLog {
    pub actor_id: String,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLogFilter {
    pub actor_id: Option<String>,
    pub entity: Option<String>,
    pub limit: Option<usize>,
}

impl AuditLogFilter {
    pub fn matches(&self, log: &AuditLog) -> bool {
        self.actor_id.as_ref().map_or(true, |a| *a == log.actor_id)
            && self.entity.as_ref().map_or(true, |e| *e == log.entity)
    }
}

/// Aggregate counters for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub total_users: u64,
    pub total_documents: u64,
    pub pending_documents: u64,
    pub open_fraud_alerts: u64,
    pub security_events_24h: u64,
}
