//! Behavior-driven tests for call-quota throttling
//!
//! These tests verify HOW the fixed-window limiter grants quota to single and
//! concurrent callers, and how a client applies it to every attempt.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use kistrade_core::{ApiRequest, Domain, RateLimitPolicy, RateLimiter};
use support::{client_with, config, ok, RecordingHttpClient};

// =============================================================================
// Rate Limiter: Window Semantics
// =============================================================================

#[test]
fn when_rate_calls_fit_in_one_window_none_of_them_blocks() {
    // Given: A limiter allowing 5 calls per 500ms
    let limiter = RateLimiter::new(5, Duration::from_millis(500));
    let blocked = AtomicUsize::new(0);

    // When: Five calls arrive back to back
    let started = Instant::now();
    for _ in 0..5 {
        assert!(limiter.acquire(true, |_| {
            blocked.fetch_add(1, Ordering::SeqCst);
        }));
    }

    // Then: None waited
    assert_eq!(blocked.load(Ordering::SeqCst), 0);
    assert!(started.elapsed() < Duration::from_millis(250));
}

#[test]
fn when_window_is_exhausted_next_call_blocks_until_it_ends() {
    // Given: An exhausted window of 2 calls per 200ms
    let limiter = RateLimiter::new(2, Duration::from_millis(200));
    let window_start = Instant::now();
    assert!(limiter.try_acquire());
    assert!(limiter.try_acquire());

    // When: A third call arrives within the window
    let elapsed_before = window_start.elapsed();
    let mut hook_wait = None;
    assert!(limiter.acquire(true, |wait| hook_wait = Some(wait)));
    let waited = window_start.elapsed() - elapsed_before;

    // Then: It waited at least the rest of the window and the hook saw it
    assert!(hook_wait.is_some());
    assert!(
        waited + Duration::from_millis(5) >= Duration::from_millis(200) - elapsed_before,
        "waited only {waited:?}"
    );
}

#[test]
fn when_window_is_exhausted_non_blocking_call_is_refused() {
    let limiter = RateLimiter::new(1, Duration::from_secs(10));

    assert!(limiter.try_acquire());
    assert!(!limiter.acquire(false, |_| panic!("non-blocking must not report a wait")));
}

#[test]
fn when_threads_compete_no_window_grants_more_than_rate() {
    // Given: 3 calls per 150ms shared by 9 threads
    let limiter = Arc::new(RateLimiter::new(3, Duration::from_millis(150)));
    let grants = Arc::new(Mutex::new(Vec::new()));
    let started = Instant::now();

    // When: Every thread acquires once
    let handles: Vec<_> = (0..9)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let grants = Arc::clone(&grants);
            thread::spawn(move || {
                limiter.acquire(true, |_| {});
                grants
                    .lock()
                    .expect("grants should not be poisoned")
                    .push(Instant::now());
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread should not panic");
    }

    // Then: Nine grants need at least three windows
    assert!(started.elapsed() >= Duration::from_millis(290));
    assert_eq!(grants.lock().expect("grants").len(), 9);
}

// =============================================================================
// Rate Limiter: Client Integration
// =============================================================================

#[test]
fn when_client_sends_more_than_the_domain_quota_calls_are_spread_over_windows() {
    // Given: A real domain limited to 2 calls per 200ms
    let transport = RecordingHttpClient::new();
    for _ in 0..3 {
        transport.push(ok(r#"{"rt_cd":"0"}"#));
    }
    let client = client_with(
        config().with_rate_limit(
            Domain::Real,
            RateLimitPolicy::new(2, Duration::from_millis(200)),
        ),
        &transport,
    );
    let request = ApiRequest::get("/uapi/ping").without_auth();

    // When: Three calls are made back to back
    let started = Instant::now();
    for _ in 0..3 {
        client.execute(&request).expect("execute succeeds");
    }

    // Then: The third call waited for the next window
    assert!(started.elapsed() >= Duration::from_millis(180));
    assert_eq!(transport.requests_to("/uapi/ping").len(), 3);
}

#[test]
fn when_quota_retries_happen_each_attempt_consumes_quota() {
    // Given: One quota-exceeded response, then success, under 1 call per 150ms
    let transport = RecordingHttpClient::new();
    transport.push_json(500, r#"{"msg_cd":"EGW00201"}"#);
    transport.push(ok(r#"{"rt_cd":"0"}"#));
    let client = client_with(
        config().with_rate_limit(
            Domain::Real,
            RateLimitPolicy::new(1, Duration::from_millis(150)),
        ),
        &transport,
    );

    // When: One call is made
    let started = Instant::now();
    client
        .execute(&ApiRequest::get("/uapi/ping").without_auth())
        .expect("retry succeeds");

    // Then: The retry waited for a fresh window
    assert!(started.elapsed() >= Duration::from_millis(130));
    assert_eq!(
        client
            .engine()
            .session(Domain::Real)
            .expect("real session")
            .limiter()
            .count(),
        1
    );
}
