//! Entity-class TTLs and cache key layout.
//!
//! Key layout:
//! ```text
//! {class}:{id}                 one entity
//! {class}:list:{discriminator} a list/aggregate read
//! {class}:by_{field}:{value}   a secondary lookup (e.g. user by username)
//! ```

use std::time::Duration;

use crate::cache::store::{CachePriority, SetOptions};
use crate::config::CacheConfig;
use crate::storage::entities::EntityClass;

#[derive(Debug, Clone)]
pub struct TtlPolicy {
    default: Duration,
    short: Duration,
    static_multiplier: u32,
}

impl TtlPolicy {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            default: Duration::from_secs(config.default_ttl_secs),
            short: Duration::from_secs(config.short_ttl_secs),
            static_multiplier: config.static_ttl_multiplier.max(1),
        }
    }

    /// TTL for a class. Zero for security-sensitive classes, which are never
    /// cached so a revoked secret cannot be served stale.
    pub fn ttl_for(&self, class: EntityClass) -> Duration {
        match class {
            EntityClass::FraudAlert
            | EntityClass::CryptoKey
            | EntityClass::EncryptedArtifact
            | EntityClass::AuditLog => Duration::ZERO,
            EntityClass::Message
            | EntityClass::SecurityEvent
            | EntityClass::BehaviorProfile
            | EntityClass::SystemMetrics => self.short,
            EntityClass::WorkflowStage => self.default.saturating_mul(self.static_multiplier),
            EntityClass::User | EntityClass::Document => self.default,
        }
    }

    pub fn is_cacheable(&self, class: EntityClass) -> bool {
        !self.ttl_for(class).is_zero()
    }

    pub fn priority_for(&self, class: EntityClass) -> CachePriority {
        match class {
            EntityClass::WorkflowStage => CachePriority::High,
            EntityClass::Message | EntityClass::SystemMetrics => CachePriority::Low,
            _ => CachePriority::Normal,
        }
    }

    pub fn set_options(&self, class: EntityClass) -> SetOptions {
        SetOptions::new(self.ttl_for(class), self.priority_for(class))
    }
}

pub fn entity_key(class: EntityClass, id: &str) -> String {
    format!("{}:{}", class.as_str(), id)
}

pub fn list_key(class: EntityClass, discriminator: &str) -> String {
    format!("{}:list:{}", class.as_str(), discriminator)
}

pub fn list_pattern(class: EntityClass) -> String {
    format!("{}:list:*", class.as_str())
}

pub fn lookup_key(class: EntityClass, field: &str, value: &str) -> String {
    format!("{}:by_{}:{}", class.as_str(), field, value)
}

pub fn lookup_pattern(class: EntityClass, field: &str) -> String {
    format!("{}:by_{}:*", class.as_str(), field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_classes() {
        let policy = TtlPolicy::new(&CacheConfig::default());
        assert_eq!(policy.ttl_for(EntityClass::User), Duration::from_secs(300));
        assert_eq!(policy.ttl_for(EntityClass::Message), Duration::from_secs(30));
        assert_eq!(policy.ttl_for(EntityClass::WorkflowStage), Duration::from_secs(3600));
        for class in [
            EntityClass::FraudAlert,
            EntityClass::CryptoKey,
            EntityClass::EncryptedArtifact,
            EntityClass::AuditLog,
        ] {
            assert!(!policy.is_cacheable(class), "{:?} must never be cached", class);
        }
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(entity_key(EntityClass::User, "u1"), "user:u1");
        assert_eq!(list_pattern(EntityClass::Document), "document:list:*");
        assert_eq!(lookup_key(EntityClass::User, "username", "thandi"), "user:by_username:thandi");
    }
}
