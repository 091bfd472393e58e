//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! resilience core. All types derive Serde traits for deserialization from
//! config files, and every section falls back to its defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the resilience core.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Read-through cache settings.
    pub cache: CacheConfig,

    /// Retry configuration for backend calls.
    pub retry: RetryConfig,

    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Threat scoring and mitigation policy.
    pub threat: ThreatPolicy,

    /// Error correction budgets and collaborators.
    pub correction: CorrectionConfig,

    /// Periodic health sweep settings.
    pub health: HealthConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Cache TTL classes and capacity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for ordinary entities (users, documents).
    pub default_ttl_secs: u64,

    /// TTL for high-churn entities (messages, security events, profiles).
    pub short_ttl_secs: u64,

    /// Multiplier over `default_ttl_secs` for near-static catalogs.
    pub static_ttl_multiplier: u32,

    /// Maximum number of entries before eviction kicks in.
    pub max_entries: usize,

    /// How long an expired entry is kept around for stale fallback.
    pub stale_retention_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            short_ttl_secs: 30,
            static_ttl_multiplier: 12,
            max_entries: 10_000,
            stale_retention_secs: 3600,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per call, including the first one.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay between attempts in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (within the window) that open the circuit.
    pub failure_threshold: u32,

    /// Window in seconds; older failures no longer count.
    pub window_secs: u64,

    /// Initial cool-down before a half-open probe is allowed.
    pub cool_down_secs: u64,

    /// Upper bound for the doubled cool-down after failed probes.
    pub max_cool_down_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window_secs: 60,
            cool_down_secs: 30,
            max_cool_down_secs: 300,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_secs)
    }

    pub fn max_cool_down(&self) -> Duration {
        Duration::from_secs(self.max_cool_down_secs)
    }
}

/// Threat scoring thresholds and mitigation windows.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreatPolicy {
    /// Accumulated score at which a source is blocked.
    pub block_threshold: u32,

    /// Accumulated score at which a source is quarantined.
    pub quarantine_threshold: u32,

    /// Confidence at which brute-force/DDoS reports are acted on immediately.
    pub high_confidence: u8,

    /// How long a block lasts.
    pub block_duration_secs: u64,

    /// How long a quarantine lasts.
    pub quarantine_secs: u64,

    /// Sustained requests per second admitted from a DDoS-protected source.
    pub ddos_rps: u32,

    /// Burst capacity for a DDoS-protected source.
    pub ddos_burst: u32,

    /// Sustained requests per second admitted from a quarantined source.
    pub quarantine_rps: u32,

    /// Burst capacity for a quarantined source.
    pub quarantine_burst: u32,

    /// How long a score survives without new reports. A score never expires
    /// before the mitigation it produced.
    pub score_retention_secs: u64,
}

impl Default for ThreatPolicy {
    fn default() -> Self {
        Self {
            block_threshold: 80,
            quarantine_threshold: 50,
            high_confidence: 95,
            block_duration_secs: 3600,
            quarantine_secs: 900,
            ddos_rps: 5,
            ddos_burst: 10,
            quarantine_rps: 1,
            quarantine_burst: 3,
            score_retention_secs: 900,
        }
    }
}

/// Error correction budgets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub database_budget_secs: u64,
    pub memory_budget_secs: u64,
    pub network_budget_secs: u64,
    pub service_budget_secs: u64,
    pub filesystem_budget_secs: u64,

    /// Restart attempts before handing over to an external supervisor.
    pub max_restart_attempts: u32,

    /// Base delay for database reconnect backoff in milliseconds.
    pub reconnect_base_delay_ms: u64,

    /// Cap for database reconnect backoff in milliseconds.
    pub reconnect_max_delay_ms: u64,

    /// Targets for the connectivity probe battery (`host:port`).
    pub probe_targets: Vec<String>,

    /// Per-probe timeout in milliseconds.
    pub probe_timeout_ms: u64,

    /// Directory used by the filesystem smoke test. Defaults to the OS temp dir.
    pub scratch_dir: Option<String>,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            database_budget_secs: 30,
            memory_budget_secs: 5,
            network_budget_secs: 10,
            service_budget_secs: 15,
            filesystem_budget_secs: 5,
            max_restart_attempts: 3,
            reconnect_base_delay_ms: 250,
            reconnect_max_delay_ms: 8000,
            probe_targets: Vec::new(),
            probe_timeout_ms: 2000,
            scratch_dir: None,
        }
    }
}

/// Periodic health sweep configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Run the periodic sweep.
    pub enabled: bool,

    /// Sweep interval in seconds.
    pub interval_secs: u64,

    /// Timeout for each subsystem check in milliseconds.
    pub check_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            check_timeout_ms: 1000,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub api_key: String,
    /// Request timeout for admin calls in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8081".to_string(),
            api_key: "admin-secret-key".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Prometheus listener address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "portal_resilience=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
