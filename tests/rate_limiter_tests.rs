// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Login attempt limiter tests.
//!
//! Window and lockout checks run on a paused tokio clock and move it with
//! `advance`. The concurrency tests run on a real multi-threaded runtime.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{advance, timeout};

use comet_guard::security::{AttemptRateLimiter, RateLimitConfig};

const EMAIL: &str = "athlete@comet.fit";

fn fail(limiter: &AttemptRateLimiter, times: usize) {
    for _ in 0..times {
        limiter.record_attempt(EMAIL);
    }
}

// =============================================================================
// ATTEMPT COUNTING
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_fifth_failure_locks_out() {
    let limiter = AttemptRateLimiter::default();

    let remaining: Vec<u32> = (0..4)
        .map(|_| {
            let outcome = limiter.record_attempt(EMAIL);
            assert!(outcome.allowed);
            assert_eq!(outcome.lockout_minutes, None);
            outcome.attempts_remaining
        })
        .collect();
    assert_eq!(remaining, vec![4, 3, 2, 1]);
    assert!(!limiter.is_limited(EMAIL));

    let fifth = limiter.record_attempt(EMAIL);
    assert!(!fifth.allowed);
    assert_eq!(fifth.attempts_remaining, 0);
    assert_eq!(fifth.lockout_minutes, Some(5));
    assert!(limiter.is_limited(EMAIL));
    assert_eq!(limiter.retry_after(EMAIL), Some(Duration::from_secs(300)));
}

#[tokio::test(start_paused = true)]
async fn test_lockout_lifts_after_lockout_period() {
    let limiter = AttemptRateLimiter::default();
    fail(&limiter, 5);

    advance(Duration::from_secs(299)).await;
    assert!(limiter.is_limited(EMAIL));
    assert_eq!(limiter.retry_after(EMAIL), Some(Duration::from_secs(1)));

    advance(Duration::from_secs(1)).await;
    assert!(!limiter.is_limited(EMAIL));
    assert_eq!(limiter.retry_after(EMAIL), None);

    // is_limited never prunes.
    assert_eq!(limiter.tracked_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_identifier() {
    let limiter = AttemptRateLimiter::default();
    fail(&limiter, 5);
    assert!(limiter.is_limited(EMAIL));

    limiter.reset(EMAIL);
    assert!(!limiter.is_limited(EMAIL));
    assert_eq!(limiter.tracked_count(), 0);
    assert_eq!(limiter.record_attempt(EMAIL).attempts_remaining, 4);
}

// =============================================================================
// WINDOW
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_window_restarts_after_expiry() {
    let limiter = AttemptRateLimiter::default();
    fail(&limiter, 3);

    advance(Duration::from_secs(901)).await;
    let outcome = limiter.record_attempt(EMAIL);
    assert!(outcome.allowed);
    assert_eq!(outcome.attempts_remaining, 4);
}

#[tokio::test(start_paused = true)]
async fn test_window_boundary_is_exclusive() {
    let limiter = AttemptRateLimiter::default();
    fail(&limiter, 2);

    advance(Duration::from_secs(900)).await;
    let outcome = limiter.record_attempt(EMAIL);
    assert_eq!(outcome.attempts_remaining, 2);
}

#[tokio::test(start_paused = true)]
async fn test_attempts_spread_inside_window_accumulate() {
    let limiter = AttemptRateLimiter::default();
    for _ in 0..4 {
        limiter.record_attempt(EMAIL);
        advance(Duration::from_secs(200)).await;
    }
    // 800s after the first failure: still the same window.
    let outcome = limiter.record_attempt(EMAIL);
    assert!(!outcome.allowed);
    assert!(limiter.is_limited(EMAIL));
}

#[tokio::test(start_paused = true)]
async fn test_active_lockout_outlives_window() {
    let limiter = AttemptRateLimiter::new(RateLimitConfig {
        max_attempts: 3,
        window_secs: 60,
        lockout_secs: 600,
    });
    for _ in 0..3 {
        limiter.record_attempt(EMAIL);
    }
    assert!(limiter.is_limited(EMAIL));

    advance(Duration::from_secs(120)).await;
    assert!(limiter.is_limited(EMAIL));

    // A failure during the lockout keeps it locked and renews it.
    let outcome = limiter.record_attempt(EMAIL);
    assert!(!outcome.allowed);
    assert_eq!(outcome.lockout_minutes, Some(10));
    assert_eq!(limiter.retry_after(EMAIL), Some(Duration::from_secs(600)));

    advance(Duration::from_secs(601)).await;
    assert!(!limiter.is_limited(EMAIL));
    assert_eq!(limiter.record_attempt(EMAIL).attempts_remaining, 2);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

const CONCURRENCY_LEVEL: usize = 64;
const TEST_TIMEOUT_SECS: u64 = 30;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_on_one_identifier() {
    let limiter = Arc::new(AttemptRateLimiter::default());
    let mut handles = vec![];

    for _ in 0..CONCURRENCY_LEVEL {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move { limiter.record_attempt(EMAIL) }));
    }

    let outcomes = timeout(Duration::from_secs(TEST_TIMEOUT_SECS), async {
        let mut outcomes = vec![];
        for handle in handles {
            outcomes.push(handle.await.expect("Task panicked"));
        }
        outcomes
    })
    .await
    .expect("Timed out waiting for attempts");

    // Exactly four callers saw each non-zero remaining count once.
    let allowed = outcomes.iter().filter(|o| o.allowed).count();
    assert_eq!(allowed, 4);
    let mut remaining: Vec<u32> = outcomes
        .iter()
        .filter(|o| o.allowed)
        .map(|o| o.attempts_remaining)
        .collect();
    remaining.sort_unstable();
    assert_eq!(remaining, vec![1, 2, 3, 4]);

    assert!(limiter.is_limited(EMAIL));
    assert_eq!(limiter.tracked_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identifiers_are_independent() {
    let limiter = Arc::new(AttemptRateLimiter::default());
    let mut handles = vec![];

    for i in 0..CONCURRENCY_LEVEL {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("member-{}@comet.fit", i);
            for _ in 0..3 {
                limiter.record_attempt(&id);
                let _ = limiter.is_limited(&id);
            }
            if i % 2 == 0 {
                limiter.reset(&id);
            }
        }));
    }

    timeout(Duration::from_secs(TEST_TIMEOUT_SECS), async {
        for handle in handles {
            handle.await.expect("Task panicked");
        }
    })
    .await
    .expect("Timed out waiting for attempts");

    assert_eq!(limiter.tracked_count(), CONCURRENCY_LEVEL / 2);
    assert!(!limiter.is_limited("member-1@comet.fit"));
}
