use std::time::{Duration, Instant};

use dashmap::DashMap;

const WINDOW: Duration = Duration::from_secs(60);

/// Per-key request limiter using the same fixed-window counting the
/// account pool applies hourly, scaled down to a one-minute window.
/// State is in-memory; a restart forgives the current window.
pub struct RateLimiter {
    windows: DashMap<i64, Window>,
}

struct Window {
    opened: Instant,
    used: u32,
}

/// Verdict for one request, also used to fill the X-RateLimit headers.
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u32,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Count one request against `key_id`. `rate_limit` is requests per
    /// minute; 0 disables limiting for the key.
    pub fn check(&self, key_id: i64, rate_limit: u32) -> RateLimitResult {
        self.check_at(key_id, rate_limit, Instant::now())
    }

    fn check_at(&self, key_id: i64, rate_limit: u32, now: Instant) -> RateLimitResult {
        if rate_limit == 0 {
            return RateLimitResult {
                allowed: true,
                limit: 0,
                remaining: 0,
                reset_secs: 0,
            };
        }

        let mut entry = self
            .windows
            .entry(key_id)
            .or_insert(Window { opened: now, used: 0 });
        let window = entry.value_mut();

        let elapsed = now.saturating_duration_since(window.opened);
        if elapsed >= WINDOW {
            window.opened = now;
            window.used = 0;
        }

        let reset_secs = WINDOW
            .saturating_sub(now.saturating_duration_since(window.opened))
            .as_secs() as u32;

        if window.used < rate_limit {
            window.used += 1;
            RateLimitResult {
                allowed: true,
                limit: rate_limit,
                remaining: rate_limit - window.used,
                reset_secs,
            }
        } else {
            RateLimitResult {
                allowed: false,
                limit: rate_limit,
                remaining: 0,
                reset_secs: reset_secs.max(1),
            }
        }
    }

    /// Drop a key's window (e.g. on key deletion).
    pub fn remove(&self, key_id: i64) {
        self.windows.remove(&key_id);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_blocks() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for i in 0..5 {
            let verdict = limiter.check_at(1, 5, now);
            assert!(verdict.allowed);
            assert_eq!(verdict.remaining, 4 - i);
        }
        let blocked = limiter.check_at(1, 5, now);
        assert!(!blocked.allowed);
        assert!(blocked.reset_secs > 0);
    }

    #[test]
    fn window_expiry_restores_the_full_allowance() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..3 {
            limiter.check_at(1, 3, now);
        }
        assert!(!limiter.check_at(1, 3, now).allowed);

        let later = now + Duration::from_secs(61);
        let verdict = limiter.check_at(1, 3, later);
        assert!(verdict.allowed);
        assert_eq!(verdict.remaining, 2);
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let limiter = RateLimiter::new();
        for _ in 0..1000 {
            assert!(limiter.check(2, 0).allowed);
        }
    }

    #[test]
    fn windows_are_per_key() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..3 {
            limiter.check_at(1, 3, now);
        }
        assert!(!limiter.check_at(1, 3, now).allowed);
        assert!(limiter.check_at(2, 3, now).allowed);
    }

    #[test]
    fn remove_starts_a_fresh_window() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..2 {
            limiter.check_at(7, 2, now);
        }
        assert!(!limiter.check_at(7, 2, now).allowed);
        limiter.remove(7);
        assert!(limiter.check_at(7, 2, now).allowed);
    }
}
