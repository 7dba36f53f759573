//! Client-side rate limiting per operation class.
//!
//! Each limiter hands out send slots at least `min_interval` apart. Slots are
//! reserved under a lock and waited for outside it, so every caller sharing
//! the limiter (any worker of any stage) is spaced, not just one thread.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

/// Minimum-interval limiter shared by all callers of one operation class
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Limiter allowing `rps` requests per second. Non-positive or non-finite
    /// rates disable limiting.
    pub fn per_second(rps: f64) -> Self {
        let min_interval = if rps.is_finite() && rps > 0.0 {
            Duration::from_secs_f64(1.0 / rps)
        } else {
            Duration::ZERO
        };
        Self::with_interval(min_interval)
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::with_interval(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until this caller's send slot arrives. Returns the time waited.
    pub fn acquire(&self) -> Duration {
        let wait = self.reserve(Instant::now());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        wait
    }

    /// Hold off every caller for at least `wait` (server-provided 429 hint).
    pub fn defer(&self, wait: Duration) {
        let until = Instant::now() + wait;
        let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        if next.is_none_or(|slot| slot < until) {
            *next = Some(until);
        }
    }

    fn reserve(&self, now: Instant) -> Duration {
        let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = match *next {
            Some(t) if t > now => t,
            _ => now,
        };
        *next = Some(slot + self.min_interval);
        slot - now
    }
}

/// Lazily-built limiters keyed by operation class
#[derive(Debug)]
pub struct RateLimiters {
    default_rps: f64,
    overrides: BTreeMap<String, f64>,
    limiters: Mutex<FxHashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiters {
    pub fn new(default_rps: f64, overrides: BTreeMap<String, f64>) -> Self {
        Self {
            default_rps,
            overrides,
            limiters: Mutex::new(FxHashMap::default()),
        }
    }

    /// Shared limiter for `class`; every call with the same class returns the same limiter.
    pub fn for_class(&self, class: &str) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        limiters
            .entry(class.to_string())
            .or_insert_with(|| {
                let rps = self
                    .overrides
                    .get(class)
                    .copied()
                    .unwrap_or(self.default_rps);
                log::debug!("rate limit for {class}: {rps} req/s");
                Arc::new(RateLimiter::per_second(rps))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_second_interval() {
        assert_eq!(
            RateLimiter::per_second(4.0).min_interval(),
            Duration::from_millis(250)
        );
        assert_eq!(RateLimiter::per_second(0.0).min_interval(), Duration::ZERO);
        assert_eq!(
            RateLimiter::per_second(f64::INFINITY).min_interval(),
            Duration::ZERO
        );
    }

    #[test]
    fn reserve_spaces_slots() {
        let limiter = RateLimiter::with_interval(Duration::from_millis(100));
        let now = Instant::now();
        assert_eq!(limiter.reserve(now), Duration::ZERO);
        assert_eq!(limiter.reserve(now), Duration::from_millis(100));
        assert_eq!(limiter.reserve(now), Duration::from_millis(200));
    }

    #[test]
    fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..10 {
            assert_eq!(limiter.acquire(), Duration::ZERO);
        }
    }

    #[test]
    fn shared_across_threads() {
        let limiter = Arc::new(RateLimiter::with_interval(Duration::from_millis(20)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let l = limiter.clone();
                std::thread::spawn(move || l.acquire())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // Four slots at 0, 20, 40, 60ms regardless of which thread got which
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn defer_pushes_next_slot() {
        let limiter = RateLimiter::unlimited();
        limiter.defer(Duration::from_millis(30));
        let waited = limiter.acquire();
        assert!(waited > Duration::from_millis(10));
    }

    #[test]
    fn registry_shares_per_class() {
        let mut overrides = BTreeMap::new();
        overrides.insert("list".to_string(), 2.0);
        let limiters = RateLimiters::new(10.0, overrides);

        let a = limiters.for_class("list");
        let b = limiters.for_class("list");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.min_interval(), Duration::from_millis(500));
        assert_eq!(
            limiters.for_class("detail").min_interval(),
            Duration::from_millis(100)
        );
    }
}
