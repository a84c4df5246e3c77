// src/stats/server_stats.rs
use crate::config::ServerStatsConfig;
use crate::stats::Distribution;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Rolling counters and circuit-breaker state for one server, as observed
/// by one load balancer.
///
/// Every counter is individually atomic; readers get a consistent value
/// per counter but no cross-counter snapshot, which is all the selection
/// rules need.
#[derive(Debug)]
pub struct ServerStats {
    config: ServerStatsConfig,
    active_requests: AtomicI64,
    total_requests: AtomicU64,
    successive_failures: AtomicU32,
    total_connection_failures: AtomicU64,
    total_blackout: AtomicU64,
    last_failed: RwLock<Option<Instant>>,
    last_active_change: RwLock<Option<Instant>>,
    response_times: Distribution,
}

impl ServerStats {
    pub fn new(config: ServerStatsConfig) -> Self {
        Self {
            config,
            active_requests: AtomicI64::new(0),
            total_requests: AtomicU64::new(0),
            successive_failures: AtomicU32::new(0),
            total_connection_failures: AtomicU64::new(0),
            total_blackout: AtomicU64::new(0),
            last_failed: RwLock::new(None),
            last_active_change: RwLock::new(None),
            response_times: Distribution::default(),
        }
    }

    /// Outstanding requests on this server. Reads as 0 (and resets) when
    /// the counter has not changed for the configured timeout, so a stuck
    /// counter from missed completions cannot poison selection forever.
    pub fn active_requests_count(&self, now: Instant) -> i64 {
        let count = self.active_requests.load(Ordering::Acquire);
        let stale = match *self.last_active_change.read() {
            Some(at) => now.saturating_duration_since(at) > self.config.active_requests_timeout(),
            None => false,
        };
        if stale || count < 0 {
            self.active_requests.store(0, Ordering::Release);
            0
        } else {
            count
        }
    }

    pub fn increment_active_requests(&self, now: Instant) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.active_requests.fetch_add(1, Ordering::AcqRel);
        *self.last_active_change.write() = Some(now);
    }

    /// Decrement with a floor of zero: a completion that was never matched
    /// by a dispatch is a no-op.
    pub fn decrement_active_requests(&self, now: Instant) {
        let _ = self
            .active_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current > 0).then(|| current - 1)
            });
        *self.last_active_change.write() = Some(now);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn successive_connection_failures(&self) -> u32 {
        self.successive_failures.load(Ordering::Acquire)
    }

    /// Lifetime connection failures; the subset filter compares this
    /// against its elimination threshold.
    pub fn failure_count(&self) -> u64 {
        self.total_connection_failures.load(Ordering::Relaxed)
    }

    /// Accumulated blackout time this server has served, in milliseconds.
    pub fn total_blackout_millis(&self) -> u64 {
        self.total_blackout.load(Ordering::Relaxed)
    }

    pub fn note_connection_failure(&self, now: Instant) {
        self.successive_failures.fetch_add(1, Ordering::AcqRel);
        self.total_connection_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_failed.write() = Some(now);
        let blackout = self.circuit_breaker_blackout();
        if !blackout.is_zero() {
            self.total_blackout
                .fetch_add(blackout.as_millis() as u64, Ordering::Relaxed);
        }
    }

    pub fn clear_successive_connection_failures(&self) {
        self.successive_failures.store(0, Ordering::Release);
    }

    pub fn note_response_time(&self, millis: f64) {
        self.response_times.record(millis);
    }

    /// Mean response time over the sample window, in milliseconds.
    pub fn response_time_avg(&self) -> f64 {
        self.response_times.mean()
    }

    pub fn response_time_percentile(&self, p: f64) -> f64 {
        self.response_times.percentile(p)
    }

    /// Blackout duration currently in force, zero while the failure count
    /// is below the trip threshold. Doubles per failure beyond the
    /// threshold and is clipped to the configured maximum.
    pub fn circuit_breaker_blackout(&self) -> Duration {
        let failures = self.successive_failures.load(Ordering::Acquire);
        let threshold = self.config.connection_failure_count_threshold;
        if failures < threshold {
            return Duration::ZERO;
        }
        let diff = (failures - threshold).min(16);
        let blackout = self.config.blackout_base() * (1u32 << diff);
        blackout.min(self.config.max_blackout())
    }

    /// Whether this server is inside its post-failure cooldown at `now`.
    pub fn is_circuit_breaker_tripped(&self, now: Instant) -> bool {
        let blackout = self.circuit_breaker_blackout();
        if blackout.is_zero() {
            return false;
        }
        match *self.last_failed.read() {
            Some(at) => now.saturating_duration_since(at) < blackout,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> ServerStats {
        ServerStats::new(ServerStatsConfig::default())
    }

    #[test]
    fn active_requests_never_go_negative() {
        let s = stats();
        let now = Instant::now();
        s.decrement_active_requests(now);
        assert_eq!(s.active_requests_count(now), 0);
        s.increment_active_requests(now);
        s.decrement_active_requests(now);
        s.decrement_active_requests(now);
        assert_eq!(s.active_requests_count(now), 0);
    }

    #[test]
    fn stale_active_count_decays_to_zero() {
        let s = stats();
        let now = Instant::now();
        s.increment_active_requests(now);
        assert_eq!(s.active_requests_count(now), 1);
        let later = now + s.config.active_requests_timeout() + Duration::from_secs(1);
        assert_eq!(s.active_requests_count(later), 0);
        // the reset sticks
        assert_eq!(s.active_requests_count(now), 0);
    }

    #[test]
    fn breaker_stays_closed_below_threshold() {
        let s = stats();
        let now = Instant::now();
        s.note_connection_failure(now);
        s.note_connection_failure(now);
        assert!(!s.is_circuit_breaker_tripped(now));
    }

    #[test]
    fn breaker_trips_at_threshold_and_recovers_after_blackout() {
        let s = stats();
        let now = Instant::now();
        for _ in 0..3 {
            s.note_connection_failure(now);
        }
        assert!(s.is_circuit_breaker_tripped(now));
        assert_eq!(s.circuit_breaker_blackout(), Duration::from_secs(10));
        let after = now + Duration::from_secs(11);
        assert!(!s.is_circuit_breaker_tripped(after));
    }

    #[test]
    fn blackout_doubles_and_clips_at_maximum() {
        let s = stats();
        let now = Instant::now();
        for _ in 0..4 {
            s.note_connection_failure(now);
        }
        // one failure past the threshold: 10s * 2
        assert_eq!(s.circuit_breaker_blackout(), Duration::from_secs(20));
        for _ in 0..10 {
            s.note_connection_failure(now);
        }
        assert_eq!(s.circuit_breaker_blackout(), Duration::from_secs(30));
    }

    #[test]
    fn success_resets_successive_failures() {
        let s = stats();
        let now = Instant::now();
        for _ in 0..5 {
            s.note_connection_failure(now);
        }
        s.clear_successive_connection_failures();
        assert!(!s.is_circuit_breaker_tripped(now));
        assert_eq!(s.successive_connection_failures(), 0);
        // lifetime failure count is untouched
        assert_eq!(s.failure_count(), 5);
    }
}
