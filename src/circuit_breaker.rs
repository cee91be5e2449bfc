//! Error-rate circuit breaker guarding calls to one upstream operation.
//!
//! # States
//!
//! - **CLOSED**: Normal operation, calls pass through while the rolling
//!   error rate stays at or under the threshold.
//! - **OPEN**: Calls fail fast without running until `reset_timeout` has
//!   elapsed.
//! - **HALF_OPEN**: Exactly one trial call is let through. Success closes
//!   the breaker, failure re-opens it.
//!
//! One breaker is shared by every call routed to the same logical operation
//! (for example all requests to one source's API). State lives behind a
//! mutex that is never held across an await point.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Time source, injectable so state transitions can be tested
/// deterministically.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Calls running longer than this are abandoned and count as failures.
    pub timeout: Duration,
    /// Trip when the rolling error rate exceeds this percentage.
    pub error_threshold_percentage: f64,
    /// How long the breaker stays open before allowing a trial call.
    pub reset_timeout: Duration,
    /// Minimum calls in the window before the breaker may trip.
    pub volume_threshold: u32,
    /// Outcomes older than this no longer count toward the error rate.
    pub rolling_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            error_threshold_percentage: 50.0,
            reset_timeout: Duration::from_secs(30),
            volume_threshold: 5,
            rolling_window: Duration::from_secs(10),
        }
    }
}

/// Observable breaker transitions and call outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerEvent {
    Success,
    Failure,
    Timeout,
    Reject,
    Open,
    HalfOpen,
    Close,
}

/// Why a guarded call did not produce a value.
#[derive(Debug, PartialEq)]
pub enum BreakerError<E> {
    /// The breaker is open (or a half-open trial is already running).
    Rejected,
    /// The call exceeded the configured timeout.
    Timeout(Duration),
    /// The operation itself failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Rejected => write!(f, "circuit breaker is open"),
            BreakerError::Timeout(d) => write!(f, "call timed out after {:?}", d),
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BreakerError<E> {}

/// Counts over the current rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub successes: u32,
    pub failures: u32,
    pub timeouts: u32,
    pub rejections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Timeout,
    Rejected,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    window: VecDeque<(Instant, Outcome)>,
    open_until: Option<Instant>,
    trial_in_flight: bool,
}

type Listener = Arc<dyn Fn(&str, BreakerEvent) + Send + Sync>;

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<Listener>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                open_until: None,
                trial_in_flight: false,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Registers a callback invoked for every event, after the state lock
    /// has been released.
    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(&str, BreakerEvent) + Send + Sync + 'static,
    {
        self.lock_listeners().push(Arc::new(listener));
    }

    /// Current state. An open breaker whose reset timeout elapsed still
    /// reports OPEN until the next call attempts the trial.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.prune(&mut inner, now);

        let mut stats = BreakerStats {
            state: inner.state,
            successes: 0,
            failures: 0,
            timeouts: 0,
            rejections: 0,
        };
        for (_, outcome) in &inner.window {
            match outcome {
                Outcome::Success => stats.successes += 1,
                Outcome::Failure => stats.failures += 1,
                Outcome::Timeout => stats.timeouts += 1,
                Outcome::Rejected => stats.rejections += 1,
            }
        }
        stats
    }

    /// Runs `op` through the breaker.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let trial = match self.admit() {
            Some(trial) => trial,
            None => return Err(BreakerError::Rejected),
        };
        let mut guard = TrialGuard {
            breaker: self,
            armed: trial,
        };

        let result = tokio::time::timeout(self.config.timeout, op()).await;
        guard.armed = false;

        match result {
            Ok(Ok(value)) => {
                self.record(Outcome::Success, trial);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record(Outcome::Failure, trial);
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                self.record(Outcome::Timeout, trial);
                Err(BreakerError::Timeout(self.config.timeout))
            }
        }
    }

    /// Like [`call`](Self::call), but hands any rejection, failure or
    /// timeout to `fallback` instead of returning it.
    pub async fn call_with_fallback<F, Fut, FB, FbFut, T, E>(
        &self,
        op: F,
        fallback: FB,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(BreakerError<E>) -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        match self.call(op).await {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::debug!("Circuit '{}' invoking fallback", self.name);
                fallback(e).await
            }
        }
    }

    /// Decides whether a call may run. `Some(true)` marks a half-open trial.
    fn admit(&self) -> Option<bool> {
        let now = self.clock.now();
        let mut events = Vec::new();

        let admitted = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => Some(false),
                CircuitState::Open => {
                    let ready = inner.open_until.map(|t| now >= t).unwrap_or(true);
                    if ready {
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_in_flight = true;
                        events.push(BreakerEvent::HalfOpen);
                        Some(true)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        None
                    } else {
                        inner.trial_in_flight = true;
                        Some(true)
                    }
                }
            }
        };

        if admitted.is_none() {
            let mut inner = self.lock();
            inner.window.push_back((now, Outcome::Rejected));
            events.push(BreakerEvent::Reject);
        }

        self.emit(&events);
        admitted
    }

    fn record(&self, outcome: Outcome, trial: bool) {
        let now = self.clock.now();
        let mut events = vec![match outcome {
            Outcome::Success => BreakerEvent::Success,
            Outcome::Failure => BreakerEvent::Failure,
            Outcome::Timeout => BreakerEvent::Timeout,
            Outcome::Rejected => BreakerEvent::Reject,
        }];

        {
            let mut inner = self.lock();
            inner.window.push_back((now, outcome));

            if trial {
                inner.trial_in_flight = false;
                if outcome == Outcome::Success {
                    inner.state = CircuitState::Closed;
                    inner.open_until = None;
                    inner.window.clear();
                    events.push(BreakerEvent::Close);
                } else {
                    self.trip(&mut inner, now);
                    events.push(BreakerEvent::Open);
                }
            } else if inner.state == CircuitState::Closed && self.should_trip(&mut inner, now) {
                self.trip(&mut inner, now);
                events.push(BreakerEvent::Open);
            }
        }

        self.emit(&events);
    }

    fn should_trip(&self, inner: &mut Inner, now: Instant) -> bool {
        self.prune(inner, now);

        let (mut total, mut errors) = (0u32, 0u32);
        for (_, outcome) in &inner.window {
            match outcome {
                Outcome::Success => total += 1,
                Outcome::Failure | Outcome::Timeout => {
                    total += 1;
                    errors += 1;
                }
                Outcome::Rejected => {}
            }
        }

        if total < self.config.volume_threshold || total == 0 {
            return false;
        }
        let error_rate = errors as f64 / total as f64 * 100.0;
        error_rate > self.config.error_threshold_percentage
    }

    fn trip(&self, inner: &mut Inner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.open_until = Some(now + self.config.reset_timeout);
        inner.trial_in_flight = false;
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        while let Some((at, _)) = inner.window.front() {
            if now.saturating_duration_since(*at) > self.config.rolling_window {
                inner.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn emit(&self, events: &[BreakerEvent]) {
        if events.is_empty() {
            return;
        }
        for event in events {
            match event {
                BreakerEvent::Open => {
                    tracing::warn!("Circuit '{}' OPEN: failing fast for {:?}", self.name, self.config.reset_timeout)
                }
                BreakerEvent::HalfOpen => tracing::info!("Circuit '{}' HALF_OPEN: allowing trial call", self.name),
                BreakerEvent::Close => tracing::info!("Circuit '{}' CLOSED", self.name),
                BreakerEvent::Reject => tracing::debug!("Circuit '{}' rejected call", self.name),
                BreakerEvent::Timeout => {
                    tracing::warn!("Circuit '{}' call timed out after {:?}", self.name, self.config.timeout)
                }
                BreakerEvent::Success | BreakerEvent::Failure => {}
            }
        }

        let listeners: Vec<Listener> = self.lock_listeners().clone();
        for listener in listeners {
            for event in events {
                listener(&self.name, *event);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Listener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Re-opens the breaker if a half-open trial is dropped before finishing.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let now = self.breaker.clock.now();
            let mut inner = self.breaker.lock();
            self.breaker.trip(&mut inner, now);
        }
    }
}
