/// Per-source circuit breaker
///
/// State transitions:
/// - Closed → Open: `failure_threshold` consecutive failures
/// - Open → HalfOpen: after the current cool-down; one trial call is admitted
/// - HalfOpen → Closed: trial succeeded, cool-down resets
/// - HalfOpen → Open: trial failed, cool-down doubles up to `max_cool_down`
use parking_lot::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Requests fail fast
    Open,
    /// One trial request is allowed through
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failure count to trigger circuit open
    pub failure_threshold: u32,
    /// Initial time spent open before a trial call
    pub cool_down: Duration,
    /// Cap for the doubled cool-down
    pub max_cool_down: Duration,
    /// Open longer than this and the breaker reports itself exhausted
    pub max_open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(300),
            max_cool_down: Duration::from_secs(3600),
            max_open_duration: Duration::from_secs(7200),
        }
    }
}

struct BreakerState {
    current: CircuitState,
    consecutive_failures: u32,
    cool_down: Duration,
    opened_at: Option<Instant>,
    /// Start of the current unbroken open/half-open stretch
    first_opened_at: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: RwLock::new(BreakerState {
                current: CircuitState::Closed,
                consecutive_failures: 0,
                cool_down: config.cool_down,
                opened_at: None,
                first_opened_at: None,
                trial_in_flight: false,
            }),
            config,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.read().current
    }

    /// Whether a call may proceed now; claims the trial slot in HalfOpen
    pub fn allow(&self) -> bool {
        let mut state = self.state.write();

        match state.current {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = state
                    .opened_at
                    .map_or(true, |opened_at| opened_at.elapsed() >= state.cool_down);
                if cooled {
                    info!("Circuit breaker: Open → HalfOpen");
                    state.current = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                }
                cooled
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    false
                } else {
                    state.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write();

        state.consecutive_failures = 0;
        if state.current != CircuitState::Closed {
            info!("Circuit breaker: {:?} → Closed", state.current);
        }
        state.current = CircuitState::Closed;
        state.cool_down = self.config.cool_down;
        state.opened_at = None;
        state.first_opened_at = None;
        state.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.write();
        state.consecutive_failures += 1;

        match state.current {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = state.consecutive_failures,
                        cool_down_secs = state.cool_down.as_secs(),
                        "Circuit breaker: Closed → Open"
                    );
                    let now = Instant::now();
                    state.current = CircuitState::Open;
                    state.opened_at = Some(now);
                    state.first_opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                state.cool_down = (state.cool_down * 2).min(self.config.max_cool_down);
                warn!(
                    cool_down_secs = state.cool_down.as_secs(),
                    "Circuit breaker: HalfOpen → Open (trial failed)"
                );
                state.current = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.trial_in_flight = false;
            }
            CircuitState::Open => {}
        }
    }

    /// The call ended without saying anything about upstream health
    /// (rate limited, cancelled); frees the half-open trial slot
    pub fn record_neutral(&self) {
        self.state.write().trial_in_flight = false;
    }

    /// Open for longer than `max_open_duration` without recovering
    pub fn exhausted(&self) -> bool {
        let state = self.state.read();
        state.current != CircuitState::Closed
            && state
                .first_opened_at
                .is_some_and(|at| at.elapsed() >= self.config.max_open_duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            cool_down: Duration::from_secs(10),
            max_cool_down: Duration::from_secs(25),
            max_open_duration: Duration::from_secs(60),
        })
    }

    fn trip(cb: &CircuitBreaker) {
        for _ in 0..3 {
            assert!(cb.allow());
            cb.record_failure();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        trip(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let cb = breaker();
        trip(&cb);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.allow());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_doubles_cool_down_up_to_cap() {
        let cb = breaker();
        trip(&cb);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cb.allow());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // Cool-down is now 20s
        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(!cb.allow());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.allow());
        cb.record_failure();

        // Capped at 25s rather than 40s
        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(cb.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_neutral_outcome_frees_trial_slot() {
        let cb = breaker();
        trip(&cb);
        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(cb.allow());
        cb.record_neutral();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_open_duration() {
        let cb = breaker();
        trip(&cb);
        assert!(!cb.exhausted());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.exhausted());

        assert!(cb.allow());
        cb.record_success();
        assert!(!cb.exhausted());
    }
}
