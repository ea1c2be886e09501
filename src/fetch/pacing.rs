//! Per-host minimum-interval gate.

use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::debug;

/// Admits at most one request per `interval` to each host.
///
/// Hosts are gated independently, so workers fetching from different hosts
/// never wait on each other. The first request to a host passes immediately.
pub struct HostPacer {
    limiter: Option<DefaultKeyedRateLimiter<String>>,
    interval: Duration,
}

impl HostPacer {
    /// A zero interval disables pacing.
    pub fn new(interval: Duration) -> Self {
        let limiter = Quota::with_period(interval).map(RateLimiter::keyed);
        Self { limiter, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until `host` may receive another request.
    pub async fn wait(&self, host: &str) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        let key = host.to_ascii_lowercase();
        if limiter.check_key(&key).is_ok() {
            return;
        }
        debug!(host = %key, interval_ms = self.interval.as_millis() as u64, "pacing request");
        limiter.until_key_ready(&key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn same_host_is_spaced() {
        let pacer = HostPacer::new(Duration::from_millis(60));
        let start = Instant::now();
        pacer.wait("a.com").await;
        pacer.wait("a.com").await;
        pacer.wait("A.COM").await;
        assert!(start.elapsed() >= Duration::from_millis(110), "{:?}", start.elapsed());
    }

    #[tokio::test]
    async fn different_hosts_do_not_wait() {
        let pacer = HostPacer::new(Duration::from_secs(5));
        let start = Instant::now();
        pacer.wait("a.com").await;
        pacer.wait("b.com").await;
        pacer.wait("c.com").await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn zero_interval_disables_pacing() {
        let pacer = HostPacer::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..10 {
            pacer.wait("a.com").await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
