//! Collaborators the correction strategies act through.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::net::{lookup_host, TcpStream};

/// Database reconnection target.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    /// Try the backend once. On success the caller's circuit is closed again.
    async fn reconnect(&self) -> Result<(), String>;

    /// Switch the documented fallback mode on or off.
    fn set_fallback_mode(&self, active: bool);

    fn fallback_mode(&self) -> bool;
}

/// Something holding memory that can be released on demand.
#[async_trait]
pub trait MemoryReclaimer: Send + Sync {
    fn name(&self) -> &str;

    /// Approximate bytes currently held.
    fn held_bytes(&self) -> u64;

    /// Release what can be released. Returns bytes freed.
    async fn reclaim(&self) -> u64;
}

/// A single connectivity check against one target.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self, target: &str, timeout: Duration) -> Result<(), String>;
}

/// TCP connect to `host:port`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnectProbe;

#[async_trait]
impl ConnectivityProbe for TcpConnectProbe {
    async fn probe(&self, target: &str, timeout: Duration) -> Result<(), String> {
        let connect = async {
            let addrs: Vec<SocketAddr> = lookup_host(target).await.map_err(|e| e.to_string())?.collect();
            let addr = addrs.first().ok_or_else(|| format!("{} did not resolve", target))?;
            TcpStream::connect(addr).await.map_err(|e| e.to_string())?;
            Ok(())
        };
        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(format!("{} timed out", target)),
        }
    }
}

/// Restarts in-process services by name.
#[async_trait]
pub trait ServiceSupervisor: Send + Sync {
    async fn restart(&self, service: &str) -> Result<(), String>;
}

/// A restartable in-process service.
#[async_trait]
pub trait Restartable: Send + Sync {
    async fn restart(&self) -> Result<(), String>;
}

/// Supervisor over a registry of named services.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<DashMap<String, Arc<dyn Restartable>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, service: Arc<dyn Restartable>) {
        self.services.insert(name.into(), service);
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[async_trait]
impl ServiceSupervisor for ServiceRegistry {
    async fn restart(&self, service: &str) -> Result<(), String> {
        // Clone out of the map so no shard lock is held across the await.
        let target = self
            .services
            .get(service)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| format!("unknown service '{}'", service))?;
        target.restart().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting(AtomicU32);

    #[async_trait]
    impl Restartable for Counting {
        async fn restart(&self) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_registry_restarts_by_name() {
        let registry = ServiceRegistry::new();
        let svc = Arc::new(Counting(AtomicU32::new(0)));
        registry.register("notifier", svc.clone());

        registry.restart("notifier").await.unwrap();
        assert_eq!(svc.0.load(Ordering::SeqCst), 1);
        assert!(registry.restart("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_tcp_probe_reaches_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        TcpConnectProbe.probe(&addr, Duration::from_secs(1)).await.unwrap();
    }
}
