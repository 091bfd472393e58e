//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use portal_resilience::config::{ResilienceConfig, RetryConfig};
use portal_resilience::lifecycle::Components;
use portal_resilience::security::{ThreatCategory, ThreatReport};
use portal_resilience::storage::entities::{NewUser, Severity, UserRole};
use portal_resilience::storage::InMemoryProvider;
use tokio::net::TcpListener;

/// Defaults with millisecond retry delays so failure paths run fast.
pub fn test_config() -> ResilienceConfig {
    ResilienceConfig {
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        ..ResilienceConfig::default()
    }
}

/// A fully wired core over a programmable in-memory backend.
pub struct Harness {
    pub backend: InMemoryProvider,
    pub components: Components,
}

pub fn harness() -> Harness {
    harness_with(test_config(), InMemoryProvider::new())
}

pub fn harness_with(config: ResilienceConfig, backend: InMemoryProvider) -> Harness {
    let components = Components::build(&config, Arc::new(backend.clone()));
    Harness { backend, components }
}

/// Start a listener that accepts and drops connections, for connectivity probes.
pub async fn start_probe_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });
    addr
}

pub fn new_user(username: &str) -> NewUser {
    NewUser {
        username: username.to_string(),
        email: format!("{}@portal.example", username),
        role: UserRole::Citizen,
    }
}

pub fn threat(ip: &str, category: ThreatCategory, severity: Severity, confidence: u8) -> ThreatReport {
    ThreatReport {
        source_ip: ip.parse().unwrap(),
        category,
        severity,
        confidence,
        indicators: vec!["failed_logins".into(), "credential_stuffing".into()],
    }
}
