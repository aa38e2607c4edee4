//! In-memory sliding-window limiter.
//!
//! Each key keeps the timestamps of its accepted hits. A hit counts while it
//! is younger than the window; a key is limited once `limit` hits are live.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { limit: u32, remaining: u32 },
    Limited { limit: u32, retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

pub struct SlidingWindowLimiter<K: Eq + Hash> {
    limit: u32,
    window: Duration,
    hits: DashMap<K, VecDeque<Instant>>,
}

impl<K: Eq + Hash + Clone> SlidingWindowLimiter<K> {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            hits: DashMap::new(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request for `key` unless the key is already at its limit.
    /// Rejected requests are not recorded.
    pub fn check(&self, key: K) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: K, now: Instant) -> RateDecision {
        let mut entry = self.hits.entry(key).or_default();
        let hits = entry.value_mut();
        prune(hits, now, self.window);

        if hits.len() as u32 >= self.limit {
            let oldest = hits.front().copied().unwrap_or(now);
            let retry_after = self.window.saturating_sub(now.saturating_duration_since(oldest));
            return RateDecision::Limited {
                limit: self.limit,
                retry_after,
            };
        }

        hits.push_back(now);
        RateDecision::Allowed {
            limit: self.limit,
            remaining: self.limit - hits.len() as u32,
        }
    }

    /// Record an event without gating on it (e.g. a failed login).
    pub fn hit(&self, key: K) -> usize {
        self.hit_at(key, Instant::now())
    }

    fn hit_at(&self, key: K, now: Instant) -> usize {
        let mut entry = self.hits.entry(key).or_default();
        let hits = entry.value_mut();
        prune(hits, now, self.window);
        hits.push_back(now);
        hits.len()
    }

    /// Live hits for `key` within the window.
    pub fn count(&self, key: &K) -> usize {
        self.count_at(key, Instant::now())
    }

    fn count_at(&self, key: &K, now: Instant) -> usize {
        match self.hits.get_mut(key) {
            Some(mut entry) => {
                prune(entry.value_mut(), now, self.window);
                entry.len()
            }
            None => 0,
        }
    }

    /// How long until `key` drops below the limit, if it is at the limit now.
    pub fn locked_for(&self, key: &K) -> Option<Duration> {
        let now = Instant::now();
        let mut entry = self.hits.get_mut(key)?;
        prune(entry.value_mut(), now, self.window);
        if (entry.len() as u32) < self.limit {
            return None;
        }
        let oldest = entry.front().copied()?;
        Some(self.window.saturating_sub(now.saturating_duration_since(oldest)))
    }

    pub fn reset(&self, key: &K) {
        self.hits.remove(key);
    }

    /// Drop keys with no live hits. Returns the number of keys removed.
    pub fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.hits.len();
        self.hits.retain(|_, hits| {
            prune(hits, now, self.window);
            !hits.is_empty()
        });
        before.saturating_sub(self.hits.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.hits.len()
    }
}

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = hits.front() {
        if now.saturating_duration_since(*oldest) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(limiter.check_at("a", now), RateDecision::Allowed { limit: 3, remaining: 2 });
        assert_eq!(limiter.check_at("a", now), RateDecision::Allowed { limit: 3, remaining: 1 });
        assert_eq!(limiter.check_at("a", now), RateDecision::Allowed { limit: 3, remaining: 0 });
        assert!(!limiter.check_at("a", now).is_allowed());

        // Other keys are independent
        assert!(limiter.check_at("b", now).is_allowed());
    }

    #[test]
    fn window_slides() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.check_at("ip", start).is_allowed());
        assert!(limiter.check_at("ip", start + Duration::from_secs(5)).is_allowed());

        match limiter.check_at("ip", start + Duration::from_secs(6)) {
            RateDecision::Limited { retry_after, .. } => assert_eq!(retry_after, Duration::from_secs(4)),
            other => panic!("expected limit, got {:?}", other),
        }

        // First hit has aged out exactly at the window boundary
        assert!(limiter.check_at("ip", start + Duration::from_secs(10)).is_allowed());
    }

    #[test]
    fn rejected_requests_are_not_recorded() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();
        assert!(limiter.check_at("k", start).is_allowed());
        for i in 1..5 {
            assert!(!limiter.check_at("k", start + Duration::from_secs(i)).is_allowed());
        }
        assert!(limiter.check_at("k", start + Duration::from_secs(10)).is_allowed());
    }

    #[test]
    fn hits_count_and_reset() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(limiter.hit_at("user".to_string(), now), 1);
        assert_eq!(limiter.hit_at("user".to_string(), now), 2);
        assert_eq!(limiter.count_at(&"user".to_string(), now), 2);
        assert_eq!(limiter.count_at(&"user".to_string(), now + Duration::from_secs(61)), 0);

        limiter.hit_at("user".to_string(), now);
        limiter.reset(&"user".to_string());
        assert_eq!(limiter.count(&"user".to_string()), 0);
    }

    #[test]
    fn locked_for_reports_remaining_lockout() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));
        limiter.hit("k");
        assert!(limiter.locked_for(&"k").is_none());
        limiter.hit("k");
        let remaining = limiter.locked_for(&"k").expect("locked");
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(50));
    }

    #[test]
    fn purge_drops_idle_keys() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_millis(1));
        limiter.hit("a");
        limiter.hit("b");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(limiter.purge_idle(), 2);
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
