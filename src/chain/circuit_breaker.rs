//! Sliding-window failure counter guarding the chain client.
//!
//! CLOSED: calls pass through. OPEN: calls fail fast until the reset timeout
//! elapses. HALF_OPEN: a single probe call is allowed through; success closes
//! the breaker, failure reopens it. The teacher's `http_client.rs` only has
//! stateless exponential backoff (`reqwest-retry`); this sits as an outer
//! layer around that middleware rather than replacing it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    failures: Vec<Instant>,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    failure_threshold: usize,
    window: Duration,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
    on_state_change: Box<dyn Fn(BreakerState, BreakerState) + Send + Sync>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, window: Duration, reset_timeout: Duration) -> Self {
        Self::with_callback(failure_threshold, window, reset_timeout, |_, _| {})
    }

    pub fn with_callback(
        failure_threshold: usize,
        window: Duration,
        reset_timeout: Duration,
        on_state_change: impl Fn(BreakerState, BreakerState) + Send + Sync + 'static,
    ) -> Self {
        Self {
            failure_threshold,
            window,
            reset_timeout,
            inner: Mutex::new(Inner { state: BreakerState::Closed, failures: Vec::new(), opened_at: None }),
            on_state_change: Box::new(on_state_change),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    /// Returns `true` if a call may proceed right now, transitioning
    /// OPEN -> HALF_OPEN if the reset timeout has elapsed.
    pub fn allow_call(&self) -> bool {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        match guard.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = guard.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.reset_timeout {
                    self.set_state(&mut guard, BreakerState::HalfOpen);
                    true
                } else {
                    false
                }
            },
        }
    }

    pub fn record_success(&self) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        guard.failures.clear();
        if guard.state != BreakerState::Closed {
            self.set_state(&mut guard, BreakerState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        let now = Instant::now();
        guard.failures.push(now);
        guard.failures.retain(|t| now.duration_since(*t) <= self.window);

        match guard.state {
            BreakerState::HalfOpen => self.set_state(&mut guard, BreakerState::Open),
            BreakerState::Closed if guard.failures.len() >= self.failure_threshold => {
                self.set_state(&mut guard, BreakerState::Open)
            },
            _ => {},
        }
    }

    fn set_state(&self, guard: &mut Inner, next: BreakerState) {
        let prev = guard.state;
        if prev == next {
            return;
        }
        guard.state = next;
        if next == BreakerState::Open {
            guard.opened_at = Some(Instant::now());
        }
        warn!(from:? = prev, to:? = next; "circuit breaker state change");
        (self.on_state_change)(prev, next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60), Duration::from_millis(10));
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_call());
    }

    #[test]
    fn half_opens_after_reset_timeout_and_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60), Duration::from_millis(5));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(10));
        assert!(breaker.allow_call());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn failed_probe_in_half_open_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60), Duration::from_millis(5));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert!(breaker.allow_call());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn state_change_callback_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let breaker = CircuitBreaker::with_callback(1, Duration::from_secs(60), Duration::from_millis(5), move |_, _| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        breaker.record_failure();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
