/// Circuit breaker lifecycle and guarded-call behavior
/// Uses a manual clock so reset timeouts are deterministic
use rust_leadflow::circuit_breaker::{
    BreakerConfig, BreakerError, BreakerEvent, CircuitBreaker, CircuitState, ManualClock,
};
use rust_leadflow::errors::ScrapeError;
use rust_leadflow::rate_limiter::RateLimiter;
use rust_leadflow::resilience::SourceGuard;
use rust_leadflow::retry::RetryPolicy;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

fn config() -> BreakerConfig {
    BreakerConfig {
        timeout: Duration::from_secs(5),
        error_threshold_percentage: 50.0,
        reset_timeout: Duration::from_secs(30),
        volume_threshold: 5,
        rolling_window: Duration::from_secs(60),
    }
}

async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
    breaker.call(|| async { Ok(1) }).await
}

async fn fail(breaker: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
    breaker.call(|| async { Err("boom") }).await
}

#[tokio::test]
async fn test_breaker_full_lifecycle() {
    let clock = Arc::new(ManualClock::new());
    let breaker = Arc::new(CircuitBreaker::with_clock("source", config(), clock.clone()));
    let events: Arc<Mutex<Vec<BreakerEvent>>> = Arc::default();
    let seen = events.clone();
    breaker.on_event(move |_, event| seen.lock().unwrap().push(event));

    // 3 failures out of 5 calls: 60% over a 50% threshold
    succeed(&breaker).await.unwrap();
    succeed(&breaker).await.unwrap();
    fail(&breaker).await.unwrap_err();
    fail(&breaker).await.unwrap_err();
    assert_eq!(breaker.state(), CircuitState::Closed);
    fail(&breaker).await.unwrap_err();
    assert_eq!(breaker.state(), CircuitState::Open);

    // Open: rejected without running the operation
    let invoked = AtomicU32::new(0);
    let result: Result<u32, BreakerError<&str>> = breaker
        .call(|| async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
        .await;
    assert_eq!(result, Err(BreakerError::Rejected));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    clock.advance(Duration::from_secs(29));
    assert_eq!(succeed(&breaker).await, Err(BreakerError::Rejected));

    // After the reset timeout exactly one trial runs
    clock.advance(Duration::from_secs(1));
    let (release, gate) = oneshot::channel::<()>();
    let trial_breaker = breaker.clone();
    let trial = tokio::spawn(async move {
        trial_breaker
            .call(|| async move {
                let _ = gate.await;
                Ok::<u32, &str>(7)
            })
            .await
    });
    while breaker.state() != CircuitState::HalfOpen {
        tokio::task::yield_now().await;
    }
    assert_eq!(succeed(&breaker).await, Err(BreakerError::Rejected));

    release.send(()).unwrap();
    assert_eq!(trial.await.unwrap(), Ok(7));
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(succeed(&breaker).await, Ok(1));

    let events = events.lock().unwrap();
    let transitions: Vec<BreakerEvent> = events
        .iter()
        .copied()
        .filter(|e| matches!(e, BreakerEvent::Open | BreakerEvent::HalfOpen | BreakerEvent::Close))
        .collect();
    assert_eq!(
        transitions,
        vec![BreakerEvent::Open, BreakerEvent::HalfOpen, BreakerEvent::Close]
    );
}

#[tokio::test]
async fn test_stats_reflect_window() {
    let clock = Arc::new(ManualClock::new());
    let breaker = CircuitBreaker::with_clock("stats", config(), clock.clone());
    succeed(&breaker).await.unwrap();
    fail(&breaker).await.unwrap_err();

    let stats = breaker.stats();
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.state, CircuitState::Closed);

    clock.advance(Duration::from_secs(61));
    let stats = breaker.stats();
    assert_eq!(stats.successes + stats.failures, 0);
}

fn guard(max_retries: u32) -> SourceGuard {
    SourceGuard::new(
        Arc::new(CircuitBreaker::new("guarded", config())),
        Arc::new(RateLimiter::new("guarded", 100, Duration::from_secs(1))),
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
    )
}

#[tokio::test]
async fn test_non_retryable_error_runs_once() {
    let guard = guard(3);
    let calls = &AtomicU32::new(0);
    let result: Result<(), ScrapeError> = guard
        .run("auth", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ScrapeError::Http {
                status: 401,
                message: "unauthorized".to_string(),
            })
        })
        .await;

    assert!(matches!(result, Err(ScrapeError::Http { status: 401, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exhausted_retries_surface_last_error() {
    let guard = guard(2);
    let calls = &AtomicU32::new(0);
    let result: Result<(), ScrapeError> = guard
        .run("flaky", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ScrapeError::Http {
                status: 503,
                message: "unavailable".to_string(),
            })
        })
        .await;

    assert!(matches!(result, Err(ScrapeError::Http { status: 503, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_guard_opens_breaker_after_sustained_failures() {
    // Every retry attempt is a breaker call: 1 + 4 retries = 5 failures
    let guard = guard(4);
    let result: Result<(), ScrapeError> = guard
        .run("down", || async {
            Err(ScrapeError::Network("connection refused".to_string()))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(guard.circuit_state(), CircuitState::Open);
}
