// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-window rate limiter for plugin routes.
//!
//! One window per (plugin, route, client). A window opens on its first
//! request and resets `window_ms` later. The map is bounded: at capacity,
//! expired windows are purged first, then the oldest window is evicted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use plinth_core::RouteKey;
use plinth_core::manifest::RateLimitDecl;

const CLEANUP_EVERY_REQUESTS: u64 = 512;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub plugin_id: String,
    pub route: RouteKey,
    pub client: String,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    length: Duration,
    count: u32,
}

impl Window {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.started_at) >= self.length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<WindowKey, Window>,
    capacity: usize,
    requests_seen: AtomicU64,
}

impl RateLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: DashMap::new(),
            capacity: capacity.max(1),
            requests_seen: AtomicU64::new(0),
        }
    }

    pub fn check(&self, key: WindowKey, limit: &RateLimitDecl) -> RateDecision {
        self.check_at(key, limit, Instant::now())
    }

    pub fn check_at(&self, key: WindowKey, limit: &RateLimitDecl, now: Instant) -> RateDecision {
        let length = Duration::from_millis(limit.window_ms);
        if limit.max == 0 || length.is_zero() {
            return RateDecision::Denied {
                retry_after: length.max(Duration::from_secs(1)),
            };
        }

        if !self.windows.contains_key(&key) && self.windows.len() >= self.capacity {
            self.make_room(now);
        }

        let decision = match self.windows.entry(key) {
            Entry::Occupied(mut occupied) => {
                let window = occupied.get_mut();
                window.length = length;
                if window.expired(now) {
                    window.started_at = now;
                    window.count = 1;
                    RateDecision::Allowed {
                        remaining: limit.max - 1,
                    }
                } else if window.count < limit.max {
                    window.count += 1;
                    RateDecision::Allowed {
                        remaining: limit.max - window.count,
                    }
                } else {
                    RateDecision::Denied {
                        retry_after: length.saturating_sub(now.duration_since(window.started_at)),
                    }
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Window {
                    started_at: now,
                    length,
                    count: 1,
                });
                RateDecision::Allowed {
                    remaining: limit.max - 1,
                }
            }
        };

        self.cleanup_if_needed(now);
        decision
    }

    /// Number of windows currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    fn make_room(&self, now: Instant) {
        self.windows.retain(|_, w| !w.expired(now));
        if self.windows.len() < self.capacity {
            return;
        }
        let oldest = self
            .windows
            .iter()
            .min_by_key(|entry| entry.value().started_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            tracing::debug!(plugin_id = %key.plugin_id, client = %key.client, "evicting oldest rate-limit window");
            self.windows.remove(&key);
        }
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.requests_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % CLEANUP_EVERY_REQUESTS == 0 {
            self.windows.retain(|_, w| !w.expired(now));
        }
    }
}

#[cfg(test)]
mod tests {
    use plinth_core::HttpMethod;

    use super::*;

    fn key(client: &str) -> WindowKey {
        WindowKey {
            plugin_id: "demo".to_string(),
            route: RouteKey::new(HttpMethod::Get, "/limited"),
            client: client.to_string(),
        }
    }

    const LIMIT: RateLimitDecl = RateLimitDecl {
        max: 3,
        window_ms: 60_000,
    };

    #[test]
    fn fourth_request_in_window_is_denied() {
        let limiter = RateLimiter::new(100);
        let start = Instant::now();
        for remaining in [2, 1, 0] {
            assert_eq!(
                limiter.check_at(key("a"), &LIMIT, start),
                RateDecision::Allowed { remaining }
            );
        }
        let later = start + Duration::from_secs(10);
        assert_eq!(
            limiter.check_at(key("a"), &LIMIT, later),
            RateDecision::Denied {
                retry_after: Duration::from_secs(50)
            }
        );
    }

    #[test]
    fn window_resets_after_length() {
        let limiter = RateLimiter::new(100);
        let start = Instant::now();
        for _ in 0..4 {
            limiter.check_at(key("a"), &LIMIT, start);
        }
        let after = start + Duration::from_millis(60_000);
        assert_eq!(
            limiter.check_at(key("a"), &LIMIT, after),
            RateDecision::Allowed { remaining: 2 }
        );
    }

    #[test]
    fn clients_have_independent_windows() {
        let limiter = RateLimiter::new(100);
        let now = Instant::now();
        for _ in 0..3 {
            limiter.check_at(key("a"), &LIMIT, now);
        }
        assert!(matches!(
            limiter.check_at(key("b"), &LIMIT, now),
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at(key("a"), &LIMIT, now),
            RateDecision::Denied { .. }
        ));
    }

    #[test]
    fn capacity_purges_expired_then_evicts_oldest() {
        let limiter = RateLimiter::new(2);
        let start = Instant::now();
        let short = RateLimitDecl {
            max: 1,
            window_ms: 1_000,
        };
        limiter.check_at(key("a"), &short, start);
        limiter.check_at(key("b"), &LIMIT, start + Duration::from_millis(10));
        assert_eq!(limiter.tracked(), 2);

        // "a" has expired and is purged to make room for "c".
        limiter.check_at(key("c"), &LIMIT, start + Duration::from_secs(2));
        assert_eq!(limiter.tracked(), 2);
        assert!(!limiter.windows.contains_key(&key("a")));

        // Nothing expired: "b" is the oldest and goes.
        limiter.check_at(key("d"), &LIMIT, start + Duration::from_secs(3));
        assert_eq!(limiter.tracked(), 2);
        assert!(!limiter.windows.contains_key(&key("b")));
        assert!(limiter.windows.contains_key(&key("c")));
        assert!(limiter.windows.contains_key(&key("d")));
    }

    #[test]
    fn zero_max_always_denies() {
        let limiter = RateLimiter::new(10);
        let decl = RateLimitDecl {
            max: 0,
            window_ms: 5_000,
        };
        assert_eq!(
            limiter.check(key("a"), &decl),
            RateDecision::Denied {
                retry_after: Duration::from_secs(5)
            }
        );
        assert_eq!(limiter.tracked(), 0);
    }
}
