//! Non-blocking token-bucket admission keyed by an arbitrary string.
//!
//! Two independent instances are created per forward: one keyed by client IP
//! (§4.3, the "ip" limiter) and one keyed by upstream name (the "upstream"
//! limiter). Buckets are created lazily on first use and never pre-populated.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use crate::models::upstream::RateLimitConfig;

struct Bucket {
    available: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(burst: u32) -> Self {
        Self {
            available: burst as f64,
            last_refill: Instant::now(),
        }
    }

    fn admit(&mut self, requests_per_second: f64, burst: u32) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.available = (self.available + elapsed * requests_per_second).min(burst as f64);
        if self.available >= 1.0 {
            self.available -= 1.0;
            true
        } else {
            false
        }
    }
}

/// A mapping from string key to an independent token bucket.
///
/// # Examples
///
/// ```
/// use llmproxy_core::services::rate_limiter::RateLimiter;
/// use llmproxy_core::models::upstream::RateLimitConfig;
///
/// let limiter = RateLimiter::new(RateLimitConfig { requests_per_second: 1.0, burst: 1 });
/// assert!(limiter.admit("1.2.3.4"));
/// assert!(!limiter.admit("1.2.3.4"));
/// ```
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Returns whether one token is consumable for `key` right now. Never blocks.
    pub fn admit(&self, key: &str) -> bool {
        {
            let mut buckets = self.buckets.write().expect("rate limiter lock poisoned");
            if let Some(bucket) = buckets.get_mut(key) {
                return bucket.admit(self.config.requests_per_second, self.config.burst);
            }
            let mut bucket = Bucket::new(self.config.burst);
            let admitted = bucket.admit(self.config.requests_per_second, self.config.burst);
            buckets.insert(key.to_string(), bucket);
            admitted
        }
    }

    /// Removes the bucket for `key`, if any; the next `admit` call creates a fresh one.
    pub fn reset(&self, key: &str) {
        self.buckets.write().expect("rate limiter lock poisoned").remove(key);
    }
}

/// Derives the rate-limit key for a client from its forwarded-for chain,
/// falling back to the real-ip header, then the raw remote address.
///
/// # Examples
///
/// ```
/// use llmproxy_core::services::rate_limiter::client_ip_key;
///
/// assert_eq!(client_ip_key(Some("10.0.0.1, 10.0.0.2"), None, "127.0.0.1"), "10.0.0.1");
/// assert_eq!(client_ip_key(None, Some("10.0.0.5"), "127.0.0.1"), "10.0.0.5");
/// assert_eq!(client_ip_key(None, None, "127.0.0.1"), "127.0.0.1");
/// ```
pub fn client_ip_key<'a>(
    forwarded_for: Option<&'a str>,
    real_ip: Option<&'a str>,
    remote_addr: &'a str,
) -> &'a str {
    if let Some(chain) = forwarded_for {
        if let Some(first) = chain.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
    }
    if let Some(ip) = real_ip {
        if !ip.trim().is_empty() {
            return ip.trim();
        }
    }
    remote_addr
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn burst_then_deny_then_refill() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_second: 10.0,
            burst: 2,
        });
        assert!(limiter.admit("k"));
        assert!(limiter.admit("k"));
        assert!(!limiter.admit("k"));
        sleep(Duration::from_millis(150));
        assert!(limiter.admit("k"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_second: 1.0,
            burst: 1,
        });
        assert!(limiter.admit("a"));
        assert!(limiter.admit("b"));
        assert!(!limiter.admit("a"));
    }

    #[test]
    fn reset_allows_immediate_readmission() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_second: 1.0,
            burst: 1,
        });
        assert!(limiter.admit("k"));
        assert!(!limiter.admit("k"));
        limiter.reset("k");
        assert!(limiter.admit("k"));
    }

    #[test]
    fn client_ip_key_prefers_forwarded_for() {
        assert_eq!(client_ip_key(Some(" 1.1.1.1 ,2.2.2.2"), Some("3.3.3.3"), "4.4.4.4"), "1.1.1.1");
        assert_eq!(client_ip_key(None, None, "4.4.4.4"), "4.4.4.4");
    }
}
