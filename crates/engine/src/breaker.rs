use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use conveyor_common::config::BreakerConfig;

/// State of the circuit breaker gating the dequeue loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation — fetches pass through.
    Closed,
    /// Breaker tripped — fetches are rejected until the cooldown elapses.
    Open,
    /// Cooldown elapsed — exactly one probe fetch allowed pool-wide.
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 = Closed, 1 = HalfOpen, 2 = Open.
    pub fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Outcome of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    Denied(&'static str),
}

impl Admission {
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Sliding-window failure detector over recent claim/processing outcomes.
///
/// Trips Closed → Open once `min_samples` outcomes exist in the window and
/// the failure ratio reaches `failure_threshold`. After `cooldown`, a single
/// probe is admitted across the whole worker pool; its outcome decides
/// between Closed and a fresh Open.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: f64,
    window: Duration,
    cooldown: Duration,
    min_samples: usize,
    /// Guards the window and state. Uses std::sync::Mutex because it is
    /// never held across await points; updates are O(1) amortized.
    inner: Mutex<BreakerInner>,
}

struct BreakerInner {
    state: CircuitState,
    /// (timestamp, was_failure) ring bounded by `window`.
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    /// Single probe slot in HalfOpen; whoever flips it wins admission.
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: &BreakerConfig) -> Self {
        let breaker = Self {
            name: name.to_string(),
            failure_threshold: config.failure_threshold,
            window: Duration::from_secs(config.window_seconds),
            cooldown: Duration::from_secs(config.cooldown_seconds),
            min_samples: config.min_samples as usize,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        };
        metrics::gauge!("breaker.state").set(CircuitState::Closed.gauge_value());
        breaker
    }

    /// Ask for admission before a fetch attempt.
    pub fn allow(&self) -> Admission {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => Admission::Granted,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.cooldown);
                if elapsed < self.cooldown {
                    return Admission::Denied("circuit open");
                }
                // Cooldown over — this caller wins the probe slot.
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                metrics::gauge!("breaker.state").set(CircuitState::HalfOpen.gauge_value());
                metrics::counter!("breaker.probes", "circuit" => self.name.clone()).increment(1);
                tracing::info!(circuit = %self.name, "Circuit breaker half-open, admitting probe");
                Admission::Granted
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Denied("probe in flight")
                } else {
                    inner.probe_in_flight = true;
                    Admission::Granted
                }
            }
        }
    }

    /// How long a denied caller should back off before asking again.
    pub fn deny_backoff(&self) -> Duration {
        (self.cooldown / 10).min(Duration::from_secs(1)).max(Duration::from_millis(10))
    }

    /// Record a successful claim or processing outcome.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        if inner.state == CircuitState::HalfOpen {
            tracing::info!(circuit = %self.name, "Probe succeeded, circuit breaker closing");
            inner.state = CircuitState::Closed;
            inner.outcomes.clear();
            inner.opened_at = None;
            inner.probe_in_flight = false;
            metrics::gauge!("breaker.state").set(CircuitState::Closed.gauge_value());
            metrics::counter!("breaker.recoveries", "circuit" => self.name.clone()).increment(1);
            return;
        }

        inner.outcomes.push_back((now, false));
        self.prune(&mut inner, now);
    }

    /// Record a failed claim or processing outcome.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        if inner.state == CircuitState::HalfOpen {
            tracing::warn!(circuit = %self.name, "Probe failed, circuit breaker re-opening");
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            inner.probe_in_flight = false;
            metrics::gauge!("breaker.state").set(CircuitState::Open.gauge_value());
            metrics::counter!("breaker.trips", "circuit" => self.name.clone()).increment(1);
            return;
        }

        inner.outcomes.push_back((now, true));
        self.prune(&mut inner, now);

        if inner.state != CircuitState::Closed {
            return;
        }

        let total = inner.outcomes.len();
        if total < self.min_samples {
            return;
        }
        let failures = inner.outcomes.iter().filter(|(_, failed)| *failed).count();
        let ratio = failures as f64 / total as f64;

        if ratio >= self.failure_threshold {
            tracing::warn!(
                circuit = %self.name,
                failures,
                total,
                threshold = self.failure_threshold,
                "Circuit breaker OPEN"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            metrics::gauge!("breaker.state").set(CircuitState::Open.gauge_value());
            metrics::counter!("breaker.trips", "circuit" => self.name.clone()).increment(1);
        }
    }

    pub fn current_state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Re-emit the state gauge (periodic reporter hook).
    pub fn report_metrics(&self) {
        metrics::gauge!("breaker.state").set(self.current_state().gauge_value());
    }

    fn prune(&self, inner: &mut BreakerInner, now: Instant) {
        while let Some((at, _)) = inner.outcomes.front() {
            if now.duration_since(*at) > self.window {
                inner.outcomes.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_samples: u32, cooldown_seconds: u64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 0.5,
            window_seconds: 60,
            cooldown_seconds,
            min_samples,
        }
    }

    fn breaker_with_cooldown_ms(min_samples: u32, cooldown_ms: u64) -> CircuitBreaker {
        // Sub-second cooldowns for tests: construct through the config path,
        // then shrink the cooldown directly.
        let mut breaker = CircuitBreaker::new("test", &config(min_samples, 1));
        breaker.cooldown = Duration::from_millis(cooldown_ms);
        breaker
    }

    #[test]
    fn test_stays_closed_below_min_samples() {
        let breaker = CircuitBreaker::new("test", &config(20, 5));
        for _ in 0..19 {
            breaker.record_failure();
        }
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert!(breaker.allow().is_granted());
    }

    #[test]
    fn test_trips_at_min_samples_and_threshold() {
        let breaker = CircuitBreaker::new("test", &config(20, 5));
        for _ in 0..20 {
            breaker.record_failure();
        }
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert_eq!(breaker.allow(), Admission::Denied("circuit open"));
    }

    #[test]
    fn test_successes_keep_ratio_below_threshold() {
        let breaker = CircuitBreaker::new("test", &config(10, 5));
        for _ in 0..12 {
            breaker.record_success();
        }
        for _ in 0..10 {
            breaker.record_failure();
        }
        // 10 failures / 22 outcomes < 0.5.
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[test]
    fn test_single_probe_slot_after_cooldown() {
        let breaker = breaker_with_cooldown_ms(5, 50);
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert!(!breaker.allow().is_granted());

        std::thread::sleep(Duration::from_millis(60));

        // First caller after cooldown wins the probe; all others are denied
        // until the probe reports.
        assert!(breaker.allow().is_granted());
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
        for _ in 0..8 {
            assert_eq!(breaker.allow(), Admission::Denied("probe in flight"));
        }
    }

    #[test]
    fn test_probe_success_closes_and_resets() {
        let breaker = breaker_with_cooldown_ms(5, 10);
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow().is_granted());

        breaker.record_success();
        assert_eq!(breaker.current_state(), CircuitState::Closed);

        // Counters were reset: the next failures need min_samples again.
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[test]
    fn test_probe_failure_reopens_with_fresh_cooldown() {
        let breaker = breaker_with_cooldown_ms(5, 40);
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(50));
        assert!(breaker.allow().is_granted());

        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
        // Fresh opened_at: still denied immediately after the probe failure.
        assert!(!breaker.allow().is_granted());

        std::thread::sleep(Duration::from_millis(50));
        assert!(breaker.allow().is_granted());
    }

    #[test]
    fn test_deny_backoff_bounded_by_cooldown_fraction() {
        let breaker = CircuitBreaker::new("test", &config(5, 30));
        assert!(breaker.deny_backoff() <= Duration::from_secs(3));
        assert!(breaker.deny_backoff() >= Duration::from_millis(10));
    }
}
