//! Configuration validation.
//!
//! Serde handles the syntactic side; this module checks value ranges and
//! cross-field consistency. All errors are collected, not just the first.

use std::fmt;

use crate::config::schema::ResilienceConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.cache.max_entries == 0 {
        errors.push(ValidationError::new("cache.max_entries", "must be > 0"));
    }
    if config.cache.static_ttl_multiplier == 0 {
        errors.push(ValidationError::new("cache.static_ttl_multiplier", "must be >= 1"));
    }

    if config.retry.max_attempts == 0 {
        errors.push(ValidationError::new("retry.max_attempts", "must be >= 1"));
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.base_delay_ms",
            "must not exceed retry.max_delay_ms",
        ));
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be >= 1"));
    }
    if cb.cool_down_secs > cb.max_cool_down_secs {
        errors.push(ValidationError::new(
            "circuit_breaker.cool_down_secs",
            "must not exceed circuit_breaker.max_cool_down_secs",
        ));
    }

    let threat = &config.threat;
    if threat.quarantine_threshold > threat.block_threshold {
        errors.push(ValidationError::new(
            "threat.quarantine_threshold",
            "must not exceed threat.block_threshold",
        ));
    }
    if threat.block_threshold > 100 {
        errors.push(ValidationError::new("threat.block_threshold", "scores are capped at 100"));
    }
    if threat.high_confidence > 100 {
        errors.push(ValidationError::new("threat.high_confidence", "must be a percentage"));
    }
    if threat.ddos_burst == 0 {
        errors.push(ValidationError::new("threat.ddos_burst", "must be >= 1"));
    }
    if threat.quarantine_burst == 0 {
        errors.push(ValidationError::new("threat.quarantine_burst", "must be >= 1"));
    }

    let corr = &config.correction;
    for (field, value) in [
        ("correction.database_budget_secs", corr.database_budget_secs),
        ("correction.memory_budget_secs", corr.memory_budget_secs),
        ("correction.network_budget_secs", corr.network_budget_secs),
        ("correction.service_budget_secs", corr.service_budget_secs),
        ("correction.filesystem_budget_secs", corr.filesystem_budget_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "budget must be > 0"));
        }
    }
    for target in &corr.probe_targets {
        if !target.contains(':') {
            errors.push(ValidationError::new(
                "correction.probe_targets",
                format!("'{}' is not host:port", target),
            ));
        }
    }

    if config.health.enabled && config.health.interval_secs == 0 {
        errors.push(ValidationError::new("health.interval_secs", "must be > 0"));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "not a socket address"));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
