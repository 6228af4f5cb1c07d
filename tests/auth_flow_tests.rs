// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end tests for the mock member flow: sign-up, sign-in with the
//! attempt limiter, logout, and the session monitor bound to the auth feed.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use comet_guard::auth::{AuthService, LoginForm, MemberStore, Membership};
use comet_guard::error::AuthError;
use comet_guard::security::{
    bind_to_auth, ActivityBus, AttemptRateLimiter, MonitorConfig, MonitorHooks, PwnedConfig,
    PwnedPasswordClient, RateLimitConfig, SessionActivityMonitor,
};

const EMAIL: &str = "sam@comet.fit";
const PASSWORD: &str = "deadlift-225";

fn service_in(dir: &TempDir) -> AuthService {
    let limiter = Arc::new(AttemptRateLimiter::new(RateLimitConfig::default()));
    AuthService::new(MemberStore::in_dir(dir.path()), limiter, None).unwrap()
}

async fn signed_up(dir: &TempDir) -> AuthService {
    let service = service_in(dir);
    service
        .sign_up(&LoginForm::signup(EMAIL, PASSWORD, "Sam"))
        .await
        .unwrap();
    service
}

// =============================================================================
// SIGN-UP
// =============================================================================

#[tokio::test]
async fn test_signup_creates_trial_member() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir);
    let auth = service.auth_state();
    assert!(!*auth.borrow());

    let outcome = service
        .sign_up(&LoginForm::signup(EMAIL, PASSWORD, "  Sam  "))
        .await
        .unwrap();
    assert_eq!(outcome.profile.name, "Sam");
    assert_eq!(outcome.profile.membership, Membership::Trial);
    assert!(!outcome.breach.compromised);

    assert!(service.is_authenticated());
    assert!(*auth.borrow());
    assert_eq!(service.current_member().unwrap().unwrap().email, EMAIL);
}

#[tokio::test]
async fn test_signup_breach_lookup_fails_open() {
    let dir = TempDir::new().unwrap();
    let pwned = PwnedPasswordClient::new(&PwnedConfig {
        enabled: true,
        api_url: "http://127.0.0.1:9".to_string(),
        timeout_secs: 1,
    });
    let limiter = Arc::new(AttemptRateLimiter::default());
    let service = AuthService::new(MemberStore::in_dir(dir.path()), limiter, Some(pwned)).unwrap();

    let outcome = service
        .sign_up(&LoginForm::signup(EMAIL, PASSWORD, "Sam"))
        .await
        .unwrap();
    assert!(!outcome.breach.compromised);
    assert_eq!(outcome.breach.count, None);
    assert!(service.is_authenticated());
}

#[tokio::test]
async fn test_signup_validation_messages() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir);

    let err = service
        .sign_up(&LoginForm::signup(EMAIL, PASSWORD, ""))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Please enter your name");

    let err = service
        .sign_up(&LoginForm::signup("sam-at-comet", PASSWORD, "Sam"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Please enter a valid email address");
    assert!(!service.is_authenticated());
}

// =============================================================================
// SIGN-IN AND THE LIMITER
// =============================================================================

#[tokio::test]
async fn test_wrong_password_counts_down_then_locks() {
    let dir = TempDir::new().unwrap();
    let service = signed_up(&dir).await;
    service.logout().unwrap();

    for expected in [4, 3, 2, 1] {
        match service.sign_in(&LoginForm::login(EMAIL, "wrong-pass")) {
            Err(AuthError::InvalidCredentials { attempts_remaining }) => {
                assert_eq!(attempts_remaining, expected)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    let err = service
        .sign_in(&LoginForm::login(EMAIL, "wrong-pass"))
        .unwrap_err();
    assert!(matches!(err, AuthError::LockedOut { minutes: 5 }));
    assert!(err.is_user_error());

    // Even the right password is refused while locked.
    let err = service.sign_in(&LoginForm::login(EMAIL, PASSWORD)).unwrap_err();
    assert!(matches!(err, AuthError::LockedOut { .. }));
    assert!(!service.is_authenticated());
}

#[tokio::test]
async fn test_successful_sign_in_resets_attempts() {
    let dir = TempDir::new().unwrap();
    let service = signed_up(&dir).await;
    service.logout().unwrap();

    service.sign_in(&LoginForm::login(EMAIL, "wrong-pass")).unwrap_err();
    service.sign_in(&LoginForm::login(EMAIL, "wrong-pass")).unwrap_err();
    assert_eq!(service.limiter().tracked_count(), 1);

    // Email case and padding do not matter.
    let profile = service
        .sign_in(&LoginForm::login("  SAM@Comet.fit ", PASSWORD))
        .unwrap();
    assert_eq!(profile.email, EMAIL);
    assert_eq!(service.limiter().tracked_count(), 0);
    assert!(service.is_authenticated());
}

#[test]
fn test_validation_failures_do_not_count() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir);

    let err = service.sign_in(&LoginForm::login(EMAIL, "123")).unwrap_err();
    assert_eq!(err.to_string(), "Password must be at least 6 characters");
    let err = service.sign_in(&LoginForm::login("", PASSWORD)).unwrap_err();
    assert_eq!(err.to_string(), "Please fill in all required fields");

    assert_eq!(service.limiter().tracked_count(), 0);
}

#[test]
fn test_unknown_email_becomes_member() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir);

    let profile = service
        .sign_in(&LoginForm::login("new.athlete@comet.fit", PASSWORD))
        .unwrap();
    assert_eq!(profile.name, "new.athlete");
    assert_eq!(profile.membership, Membership::Crossfit);
    assert!(service.is_authenticated());
}

// =============================================================================
// PERSISTENCE AND LOGOUT
// =============================================================================

#[tokio::test]
async fn test_signed_in_flag_survives_restart() {
    let dir = TempDir::new().unwrap();
    drop(signed_up(&dir).await);

    let service = service_in(&dir);
    assert!(service.is_authenticated());

    service.logout().unwrap();
    let service = service_in(&dir);
    assert!(!service.is_authenticated());
    assert!(service.current_member().unwrap().is_some());
}

#[tokio::test]
async fn test_logout_action_flips_feed() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(signed_up(&dir).await);
    let auth = service.auth_state();
    assert!(*auth.borrow());

    let logout = service.logout_action();
    logout().await.unwrap();

    assert!(!*auth.borrow());
    assert!(!MemberStore::in_dir(dir.path()).load().unwrap().authenticated);
}

#[tokio::test]
async fn test_logout_action_waits_for_lock_off_the_runtime() {
    use fs2::FileExt;
    use std::fs::OpenOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let dir = TempDir::new().unwrap();
    let service = Arc::new(signed_up(&dir).await);

    // Another process holds the store lock for a while.
    let held = OpenOptions::new()
        .read(true)
        .write(true)
        .open(dir.path().join("member.lock"))
        .unwrap();
    held.lock_exclusive().unwrap();
    let holder = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        FileExt::unlock(&held).unwrap();
    });

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    service.logout_action()().await.unwrap();
    ticker.abort();
    holder.join().unwrap();

    // The single runtime thread kept running other tasks during the wait.
    assert!(ticks.load(Ordering::SeqCst) >= 5);
    assert!(!service.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_logs_member_out() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(signed_up(&dir).await);

    let bus = Arc::new(ActivityBus::new());
    let hooks = MonitorHooks::from_logout_fn(service.logout_action());
    let monitor = SessionActivityMonitor::new(MonitorConfig::custom(120, 30), hooks, bus.clone());
    let binding = bind_to_auth(monitor.clone(), service.auth_state());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(monitor.is_enabled());
    assert_eq!(bus.listener_count(), 1);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(!service.is_authenticated());
    assert!(!monitor.is_enabled());
    assert_eq!(bus.listener_count(), 0);
    assert!(!MemberStore::in_dir(dir.path()).load().unwrap().authenticated);

    // Signing back in re-arms the monitor through the auth feed.
    service.sign_in(&LoginForm::login(EMAIL, PASSWORD)).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(monitor.is_enabled());

    drop(service);
    binding.abort();
}
