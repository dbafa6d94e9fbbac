//! Three-state circuit breaker guarding embedding calls: closed, open,
//! half-open. `allow()` is the only pre-call gate and is constant-time;
//! `record_success` / `record_failure` are called by the caller after the
//! guarded operation.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown_ms: u64,
    failures: AtomicU32,
    opened_at_ms: AtomicU64,
    state: Mutex<State>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown_ms: u64) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown_ms,
            failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            state: Mutex::new(State::Closed),
        }
    }

    /// The only pre-call gate. Transitions open -> half_open internally
    /// when the cooldown has elapsed, admitting exactly one probe: the call
    /// that performs the transition sees `true`, every other caller sees
    /// `HalfOpen` already in place and is denied until the probe resolves
    /// via `record_success`/`record_failure`.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        match *state {
            State::Closed => true,
            State::HalfOpen => false,
            State::Open => {
                let elapsed = now_ms().saturating_sub(self.opened_at_ms.load(Ordering::Acquire));
                if elapsed >= self.cooldown_ms {
                    *state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        if *state != State::Closed {
            *state = State::Closed;
        }
        self.failures.store(0, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        match *state {
            State::Closed => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.failure_threshold {
                    *state = State::Open;
                    self.opened_at_ms.store(now_ms(), Ordering::Release);
                    warn!(failures, "circuit breaker opened");
                }
            }
            State::HalfOpen => {
                *state = State::Open;
                self.opened_at_ms.store(now_ms(), Ordering::Release);
                warn!("circuit breaker probe failed, reopening");
            }
            State::Open => {}
        }
    }

    pub fn is_open(&self) -> bool {
        *self.state.lock().expect("breaker lock poisoned") == State::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(2, 50);
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(!breaker.allow());
        assert!(breaker.is_open());
    }

    #[test]
    fn half_open_probe_admitted_after_cooldown() {
        let breaker = CircuitBreaker::new(1, 20);
        breaker.record_failure();
        assert!(!breaker.allow());
        sleep(Duration::from_millis(30));
        assert!(breaker.allow());
    }

    #[test]
    fn success_in_half_open_closes_breaker() {
        let breaker = CircuitBreaker::new(1, 10);
        breaker.record_failure();
        sleep(Duration::from_millis(20));
        assert!(breaker.allow());
        breaker.record_success();
        assert!(!breaker.is_open());
        // Closed again: needs a fresh run of failures to reopen.
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn only_transitioning_call_is_admitted_while_half_open() {
        let breaker = CircuitBreaker::new(1, 10);
        breaker.record_failure();
        sleep(Duration::from_millis(20));
        assert!(breaker.allow());
        // Probe unresolved: further concurrent callers are denied, not admitted.
        assert!(!breaker.allow());
        assert!(!breaker.allow());
    }

    #[test]
    fn failure_in_half_open_reopens() {
        let breaker = CircuitBreaker::new(1, 10);
        breaker.record_failure();
        sleep(Duration::from_millis(20));
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow());
    }
}
