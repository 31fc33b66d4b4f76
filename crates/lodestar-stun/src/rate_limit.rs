//! Per-IP rate limiting for Binding requests.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding-window request limiter keyed by source IP.
///
/// Cloning yields another handle onto the same history.
#[derive(Clone, Debug)]
pub struct StunRateLimiter {
    requests: Arc<DashMap<IpAddr, Vec<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl StunRateLimiter {
    /// Allow `max_requests_per_second` requests per IP in any one-second window.
    ///
    /// # Examples
    ///
    /// ```
    /// use lodestar_stun::StunRateLimiter;
    ///
    /// let limiter = StunRateLimiter::new(10);
    /// assert!(limiter.allow_request("192.0.2.1".parse().unwrap()));
    /// ```
    #[must_use]
    pub fn new(max_requests_per_second: usize) -> Self {
        Self::with_window(max_requests_per_second, Duration::from_secs(1))
    }

    /// Allow `max_requests` requests per IP in any `window`.
    #[must_use]
    pub fn with_window(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: Arc::new(DashMap::new()),
            max_requests,
            window,
        }
    }

    /// Record a request from `ip`, returning `false` if it exceeds the limit.
    pub fn allow_request(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut history = self.requests.entry(ip).or_default();

        history.retain(|&t| now.duration_since(t) < self.window);
        if history.len() >= self.max_requests {
            return false;
        }
        history.push(now);
        true
    }

    /// Drop history that has aged out of the window
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.requests.retain(|_, history| {
            history.retain(|&t| now.duration_since(t) < self.window);
            !history.is_empty()
        });
    }

    /// Number of IPs with recorded history
    #[must_use]
    pub fn tracked_ips(&self) -> usize {
        self.requests.len()
    }
}

impl Default for StunRateLimiter {
    fn default() -> Self {
        Self::new(10)
    }
}
