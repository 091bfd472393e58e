//! Per-source token buckets for DDoS protection and quarantine.

use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// A simple token bucket rate limiter.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone)]
struct ProtectedSource {
    bucket: TokenBucket,
    until: Instant,
}

/// Sources under a traffic restriction, each with its own bucket and deadline.
#[derive(Debug, Default)]
pub struct SourceThrottle {
    sources: DashMap<IpAddr, ProtectedSource>,
}

impl SourceThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `ip` under protection for `duration`. An existing bucket keeps
    /// its tokens; only the deadline moves.
    pub fn protect(&self, ip: IpAddr, duration: Duration, burst: u32) {
        self.protect_until(ip, Instant::now() + duration, burst);
    }

    pub fn protect_until(&self, ip: IpAddr, until: Instant, burst: u32) {
        self.sources
            .entry(ip)
            .and_modify(|s| s.until = s.until.max(until))
            .or_insert_with(|| ProtectedSource {
                bucket: TokenBucket::new(burst as f64),
                until,
            });
    }

    /// `None` if `ip` is not protected, otherwise whether a token was taken.
    pub fn check(&self, ip: IpAddr, rps: u32, burst: u32) -> Option<bool> {
        let now = Instant::now();
        let mut source = self.sources.get_mut(&ip)?;
        if now >= source.until {
            drop(source);
            self.sources.remove_if(&ip, |_, s| now >= s.until);
            return None;
        }
        Some(source.bucket.try_acquire(burst as f64, rps as f64))
    }

    pub fn is_protected(&self, ip: IpAddr) -> bool {
        self.sources
            .get(&ip)
            .map_or(false, |s| Instant::now() < s.until)
    }

    pub fn lift(&self, ip: IpAddr) -> bool {
        self.sources.remove(&ip).is_some()
    }

    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.sources.len();
        self.sources.retain(|_, s| now < s.until);
        before - self.sources.len()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "203.0.113.9".parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let shield = SourceThrottle::new();
        assert_eq!(shield.check(ip(), 5, 2), None);

        shield.protect(ip(), Duration::from_secs(60), 2);
        assert_eq!(shield.check(ip(), 5, 2), Some(true));
        assert_eq!(shield.check(ip(), 5, 2), Some(true));
        assert_eq!(shield.check(ip(), 5, 2), Some(false));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(shield.check(ip(), 5, 2), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_protection_expires() {
        let shield = SourceThrottle::new();
        shield.protect(ip(), Duration::from_secs(10), 1);
        assert!(shield.is_protected(ip()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!shield.is_protected(ip()));
        assert_eq!(shield.sweep(), 1);
        assert!(shield.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_only_moves_forward() {
        let shield = SourceThrottle::new();
        let later = Instant::now() + Duration::from_secs(30);
        shield.protect_until(ip(), later, 1);
        shield.protect(ip(), Duration::from_secs(5), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(shield.is_protected(ip()));
        // The bucket kept its state across the second call.
        assert_eq!(shield.check(ip(), 0, 1), Some(true));
        assert_eq!(shield.check(ip(), 0, 1), Some(false));
    }
}
