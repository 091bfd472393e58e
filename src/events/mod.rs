//! Remediation event stream.
//!
//! Every mitigation or correction attempt emits exactly one
//! [`RemediationEvent`]. Subscribers that lag behind lose the oldest events;
//! emitting never blocks and never fails when nobody listens.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::unix_millis;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationKind {
    ThreatMitigation,
    DatabaseRecovery,
    MemoryRecovery,
    NetworkRecovery,
    ServiceRecovery,
    FilesystemRecovery,
}

impl RemediationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RemediationKind::ThreatMitigation => "threat_mitigation",
            RemediationKind::DatabaseRecovery => "database_recovery",
            RemediationKind::MemoryRecovery => "memory_recovery",
            RemediationKind::NetworkRecovery => "network_recovery",
            RemediationKind::ServiceRecovery => "service_recovery",
            RemediationKind::FilesystemRecovery => "filesystem_recovery",
        }
    }

    /// Human-readable event name.
    pub fn event_name(self) -> &'static str {
        match self {
            RemediationKind::ThreatMitigation => "security threat mitigated",
            RemediationKind::DatabaseRecovery => "database recovery completed",
            RemediationKind::MemoryRecovery => "memory recovery completed",
            RemediationKind::NetworkRecovery => "network recovery completed",
            RemediationKind::ServiceRecovery => "service recovery completed",
            RemediationKind::FilesystemRecovery => "filesystem recovery completed",
        }
    }
}

/// Immutable record of one remediation attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationEvent {
    pub id: Uuid,
    pub kind: RemediationKind,
    pub name: &'static str,
    pub latency_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_mode: Option<bool>,
    pub details: String,
    pub emitted_at_ms: u64,
}

impl RemediationEvent {
    pub fn new(kind: RemediationKind, latency_ms: u64, success: bool, details: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            name: kind.event_name(),
            latency_ms,
            success,
            fallback_mode: None,
            details: details.into(),
            emitted_at_ms: unix_millis(),
        }
    }

    pub fn with_fallback_mode(mut self, fallback_mode: bool) -> Self {
        self.fallback_mode = Some(fallback_mode);
        self
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RemediationEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RemediationEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: RemediationEvent) {
        tracing::info!(
            event = event.name,
            latency_ms = event.latency_ms,
            success = event.success,
            fallback_mode = ?event.fallback_mode,
            details = %event.details,
            "Remediation event"
        );
        crate::observability::metrics::record_remediation(event.kind.as_str(), event.success, event.latency_ms);
        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
