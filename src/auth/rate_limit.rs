use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use chrono::{DateTime, Utc, Duration};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_size: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_size: Duration::minutes(1),
        }
    }
}

#[derive(Debug)]
struct RequestWindow {
    timestamps: Vec<DateTime<Utc>>,
}

impl RequestWindow {
    fn new() -> Self {
        Self {
            timestamps: Vec::new(),
        }
    }

    fn cleanup_old_requests(&mut self, window_size: Duration) {
        let cutoff = Utc::now() - window_size;
        self.timestamps.retain(|ts| *ts > cutoff);
    }

    fn add_request(&mut self) {
        self.timestamps.push(Utc::now());
    }

    fn request_count(&self) -> usize {
        self.timestamps.len()
    }
}

/// Sliding-window limiter keyed by caller (`user:<id>` or `guest:<id>`).
/// The limit is passed per check because it comes from the admin
/// configuration, which may change between requests.
pub struct RateLimiter {
    windows: Arc<RwLock<HashMap<String, RequestWindow>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Records a request and returns true when `key` is still under `limit`
    /// requests per window. A limit of zero disables limiting.
    pub async fn check_rate_limit(&self, key: &str, limit: u32) -> bool {
        if limit == 0 {
            return true;
        }

        let mut windows = self.windows.write().await;
        let window = windows.entry(key.to_string()).or_insert_with(RequestWindow::new);
        window.cleanup_old_requests(self.config.window_size);

        if window.request_count() < limit as usize {
            window.add_request();
            true
        } else {
            false
        }
    }

    pub async fn cleanup(&self) {
        let mut windows = self.windows.write().await;

        // Remove windows with no recent requests
        windows.retain(|_, window| {
            window.cleanup_old_requests(self.config.window_size);
            !window.timestamps.is_empty()
        });
    }

    pub async fn tracked_keys(&self) -> usize {
        self.windows.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration as TokioDuration};

    #[tokio::test]
    async fn test_rate_limiter() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window_size: Duration::seconds(1),
        });

        for _ in 0..5 {
            assert!(limiter.check_rate_limit("user:a", 5).await);
        }
        assert!(!limiter.check_rate_limit("user:a", 5).await);

        // Other callers are unaffected
        assert!(limiter.check_rate_limit("guest:b", 5).await);

        sleep(TokioDuration::from_millis(1100)).await;
        assert!(limiter.check_rate_limit("user:a", 5).await);
    }

    #[tokio::test]
    async fn test_zero_limit_disables_limiting() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        for _ in 0..50 {
            assert!(limiter.check_rate_limit("user:a", 0).await);
        }
        assert_eq!(limiter.tracked_keys().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_windows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window_size: Duration::milliseconds(200),
        });
        assert!(limiter.check_rate_limit("user:a", 3).await);
        assert_eq!(limiter.tracked_keys().await, 1);

        sleep(TokioDuration::from_millis(300)).await;
        limiter.cleanup().await;
        assert_eq!(limiter.tracked_keys().await, 0);
    }
}
