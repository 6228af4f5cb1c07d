// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session inactivity monitor.
//!
//! Watches user activity for an authenticated member and logs them out
//! after a stretch of inactivity, with a countdown warning shortly before.
//!
//! ## Timeline
//!
//! Measured from the most recent activity signal:
//!
//! - `timeout - warning_lead`: the warning becomes visible, `on_warning`
//!   runs once and a 1-second countdown starts.
//! - `timeout`: the warning is hidden, `on_timeout` runs once and the
//!   logout hook is awaited.
//!
//! Any activity signal, or [`SessionActivityMonitor::extend_session`],
//! cancels the pending warning/expiry/countdown timers and schedules fresh
//! ones from now.
//!
//! ## Timers
//!
//! Each timer is a tokio task. A reset aborts the old tasks before spawning
//! new ones, and every task carries the reset generation it was scheduled
//! under; it re-checks that generation under the state lock before doing
//! anything, so a callback from an older cycle can never fire.
//!
//! The countdown is derived from elapsed time since the last activity, not
//! from counting ticks, so late or skipped ticks never skew it. The clock is
//! monotonic; time the host spends asleep is not counted on every platform.

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::activity::{ActivityKind, ActivitySource, SubscriptionId};
use super::locks::resilient_lock;
use crate::error::AuthError;
use crate::utils::format_remaining;

/// Default inactivity timeout: 30 minutes.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30 * 60;

/// Default warning lead time before the timeout: 5 minutes.
pub const DEFAULT_WARNING_LEAD_SECS: u64 = 5 * 60;

/// Countdown refresh interval while the warning is visible.
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Monitor configuration. Immutable for the lifetime of a monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Inactivity period after which the session is logged out.
    pub timeout_secs: u64,

    /// How long before the timeout the warning appears.
    pub warning_lead_secs: u64,

    /// Activity signal kinds that count as user activity.
    pub signals: Vec<ActivityKind>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            warning_lead_secs: DEFAULT_WARNING_LEAD_SECS,
            signals: ActivityKind::ALL.to_vec(),
        }
    }
}

impl MonitorConfig {
    /// Custom timings listening to every signal kind.
    ///
    /// A lead time at or above the timeout is accepted; the warning then
    /// shows as soon as the cycle starts.
    pub fn custom(timeout_secs: u64, warning_lead_secs: u64) -> Self {
        if warning_lead_secs >= timeout_secs {
            tracing::warn!(
                "SESSION_CONFIG | warning lead {}s is not shorter than timeout {}s; warning will show immediately",
                warning_lead_secs,
                timeout_secs
            );
        }

        Self {
            timeout_secs,
            warning_lead_secs,
            ..Self::default()
        }
    }

    /// Restrict the recognized signal kinds.
    pub fn with_signals(mut self, signals: &[ActivityKind]) -> Self {
        self.signals = signals.to_vec();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay from the last activity until the warning fires.
    pub fn warning_delay(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.saturating_sub(self.warning_lead_secs))
    }
}

/// Callback without arguments, used for the warning and timeout hooks.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Async logout action supplied by the authentication collaborator.
pub type LogoutFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), AuthError>> + Send + Sync>;

/// Hooks the monitor calls into.
#[derive(Clone)]
pub struct MonitorHooks {
    on_warning: Option<Callback>,
    on_timeout: Option<Callback>,
    logout: LogoutFn,
}

impl MonitorHooks {
    /// Hooks with only the (required) logout action.
    pub fn new<F, Fut>(logout: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AuthError>> + Send + 'static,
    {
        let logout: LogoutFn = Arc::new(move || logout().boxed());
        Self::from_logout_fn(logout)
    }

    /// Hooks around an already boxed logout action.
    pub fn from_logout_fn(logout: LogoutFn) -> Self {
        Self {
            on_warning: None,
            on_timeout: None,
            logout,
        }
    }

    pub fn on_warning(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_warning = Some(Arc::new(callback));
        self
    }

    pub fn on_timeout(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Arc::new(callback));
        self
    }
}

/// Snapshot of what the hosting UI renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// Whether the monitor is enabled (member authenticated).
    pub active: bool,

    /// Whether the expiry warning is displayed.
    pub warning_visible: bool,

    /// Seconds until expiry; refreshed every second while the warning shows.
    pub remaining_secs: u64,

    /// Message of the most recent failed logout, cleared by a successful one.
    pub last_logout_error: Option<String>,
}

impl SessionStatus {
    /// Remaining time as `M:SS`.
    pub fn remaining_formatted(&self) -> String {
        format_remaining(self.remaining_secs)
    }
}

/// Why the inactivity cycle restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTrigger {
    Enabled,
    Activity(ActivityKind),
    Extended,
}

impl std::fmt::Display for ResetTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetTrigger::Enabled => f.write_str("enabled"),
            ResetTrigger::Activity(kind) => write!(f, "activity:{}", kind),
            ResetTrigger::Extended => f.write_str("extended"),
        }
    }
}

/// Monitor events for the audit log.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Enabled {
        timeout_secs: u64,
        warning_lead_secs: u64,
    },
    Reset {
        trigger: ResetTrigger,
        remaining_secs: u64,
    },
    WarningIssued {
        expires_in_secs: u64,
    },
    Expired {
        idle_secs: u64,
    },
    LogoutFailed {
        reason: String,
    },
    Disabled {
        reason: String,
    },
}

impl MonitorEvent {
    /// Format event for the audit log.
    pub fn to_audit_string(&self) -> String {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        match self {
            MonitorEvent::Enabled { timeout_secs, warning_lead_secs } => format!(
                "{} | SESSION_MONITOR_ENABLED | timeout={}s warning_lead={}s",
                timestamp, timeout_secs, warning_lead_secs
            ),
            MonitorEvent::Reset { trigger, remaining_secs } => format!(
                "{} | SESSION_RESET | trigger={} remaining={}s",
                timestamp, trigger, remaining_secs
            ),
            MonitorEvent::WarningIssued { expires_in_secs } => format!(
                "{} | SESSION_WARNING | expires_in={}s",
                timestamp, expires_in_secs
            ),
            MonitorEvent::Expired { idle_secs } => {
                format!("{} | SESSION_EXPIRED | idle={}s", timestamp, idle_secs)
            }
            MonitorEvent::LogoutFailed { reason } => {
                format!("{} | SESSION_LOGOUT_FAILED | reason={}", timestamp, reason)
            }
            MonitorEvent::Disabled { reason } => {
                format!("{} | SESSION_MONITOR_DISABLED | reason={}", timestamp, reason)
            }
        }
    }
}

#[derive(Default)]
struct PendingTimers {
    warning: Option<JoinHandle<()>>,
    expiry: Option<JoinHandle<()>>,
    countdown: Option<JoinHandle<()>>,
}

impl PendingTimers {
    fn cancel_all(&mut self) {
        for handle in [self.warning.take(), self.expiry.take(), self.countdown.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

struct MonitorState {
    enabled: bool,
    generation: u64,
    last_activity_at: Instant,
    warning_visible: bool,
    timers: PendingTimers,
    listener: Option<(SubscriptionId, JoinHandle<()>)>,
}

struct Shared {
    config: MonitorConfig,
    hooks: MonitorHooks,
    source: Arc<dyn ActivitySource>,
    state: Mutex<MonitorState>,
    status: watch::Sender<SessionStatus>,
}

/// Inactivity monitor for one authenticated session.
///
/// Cheap to clone; clones share the same timers and status. Must be enabled
/// from within a tokio runtime.
#[derive(Clone)]
pub struct SessionActivityMonitor {
    shared: Arc<Shared>,
}

impl SessionActivityMonitor {
    /// Create an inert monitor. Nothing is scheduled until [`enable`](Self::enable).
    pub fn new(config: MonitorConfig, hooks: MonitorHooks, source: Arc<dyn ActivitySource>) -> Self {
        let initial = SessionStatus {
            active: false,
            warning_visible: false,
            remaining_secs: config.timeout_secs,
            last_logout_error: None,
        };
        let (status, _) = watch::channel(initial);

        let state = MonitorState {
            enabled: false,
            generation: 0,
            last_activity_at: Instant::now(),
            warning_visible: false,
            timers: PendingTimers::default(),
            listener: None,
        };

        Self {
            shared: Arc::new(Shared {
                config,
                hooks,
                source,
                state: Mutex::new(state),
                status,
            }),
        }
    }

    /// Start listening for activity and arm the timers. No-op when enabled.
    pub fn enable(&self) {
        self.shared.enable();
    }

    /// Remove listeners and cancel every timer. No-op when disabled.
    pub fn disable(&self) {
        self.shared.teardown("disabled");
    }

    pub fn is_enabled(&self) -> bool {
        resilient_lock(&self.shared.state).enabled
    }

    /// Restart the inactivity cycle, exactly as an activity signal would.
    pub fn extend_session(&self) {
        self.shared.reset(ResetTrigger::Extended);
    }

    /// Feed one activity signal directly.
    ///
    /// Returns false (and does nothing) for kinds outside the configured set.
    pub fn record_activity(&self, kind: ActivityKind) -> bool {
        if !self.shared.config.signals.contains(&kind) {
            return false;
        }
        self.shared.reset(ResetTrigger::Activity(kind));
        true
    }

    /// Log out immediately (the warning's "logout now" action).
    ///
    /// Cancels pending timers, awaits the logout hook and returns its result.
    /// On success the monitor is torn down.
    pub async fn logout_now(&self) -> Result<(), AuthError> {
        {
            let mut state = resilient_lock(&self.shared.state);
            state.generation += 1;
            state.timers.cancel_all();
            state.warning_visible = false;
            let active = state.enabled;
            self.shared.publish(active, false, self.shared.config.timeout_secs);
        }
        self.shared.run_logout("manual").await
    }

    /// Current status snapshot.
    pub fn status(&self) -> SessionStatus {
        self.shared.status.borrow().clone()
    }

    /// Receiver that is notified on every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }
}

impl Shared {
    fn enable(self: &Arc<Self>) {
        let mut state = resilient_lock(&self.state);
        if state.enabled {
            return;
        }
        state.enabled = true;

        let subscription = self.source.subscribe(&self.config.signals);
        let listener = spawn_listener(Arc::downgrade(self), subscription.signals);
        state.listener = Some((subscription.id, listener));

        tracing::info!(
            "{}",
            MonitorEvent::Enabled {
                timeout_secs: self.config.timeout_secs,
                warning_lead_secs: self.config.warning_lead_secs,
            }
            .to_audit_string()
        );

        self.restart_locked(&mut state, ResetTrigger::Enabled);
    }

    fn reset(self: &Arc<Self>, trigger: ResetTrigger) {
        let mut state = resilient_lock(&self.state);
        self.restart_locked(&mut state, trigger);
    }

    /// Cancel everything pending, then schedule a fresh cycle from now.
    fn restart_locked(self: &Arc<Self>, state: &mut MonitorState, trigger: ResetTrigger) {
        state.timers.cancel_all();
        state.generation += 1;
        state.last_activity_at = Instant::now();
        state.warning_visible = false;

        if state.enabled {
            self.schedule_locked(state);
        }
        self.publish(state.enabled, false, self.config.timeout_secs);

        tracing::debug!(
            "{}",
            MonitorEvent::Reset {
                trigger,
                remaining_secs: self.config.timeout_secs,
            }
            .to_audit_string()
        );
    }

    fn schedule_locked(self: &Arc<Self>, state: &mut MonitorState) {
        let generation = state.generation;
        let base = state.last_activity_at;

        let weak = Arc::downgrade(self);
        let warning_at = base + self.config.warning_delay();
        state.timers.warning = Some(tokio::spawn(async move {
            tokio::time::sleep_until(warning_at).await;
            if let Some(shared) = weak.upgrade() {
                shared.fire_warning(generation);
            }
        }));

        let weak = Arc::downgrade(self);
        let expiry_at = base + self.config.timeout();
        state.timers.expiry = Some(tokio::spawn(async move {
            tokio::time::sleep_until(expiry_at).await;
            if let Some(shared) = weak.upgrade() {
                // Failures are logged and published by fire_expiry.
                let _ = shared.fire_expiry(generation).await;
            }
        }));
    }

    fn fire_warning(self: &Arc<Self>, generation: u64) {
        let remaining = {
            let mut state = resilient_lock(&self.state);
            if !state.enabled || state.generation != generation {
                return;
            }
            // Our own handle; dropping detaches without aborting this task.
            drop(state.timers.warning.take());

            let now = Instant::now();
            state.warning_visible = true;
            state.timers.countdown = Some(spawn_countdown(Arc::downgrade(self), generation, now));

            let remaining = self.remaining_at(state.last_activity_at, now);
            self.publish(true, true, remaining);
            remaining
        };

        tracing::warn!(
            "{}",
            MonitorEvent::WarningIssued { expires_in_secs: remaining }.to_audit_string()
        );

        if let Some(on_warning) = &self.hooks.on_warning {
            on_warning();
        }
    }

    /// Returns false once the countdown no longer belongs to the live cycle.
    fn tick_countdown(&self, generation: u64) -> bool {
        let state = resilient_lock(&self.state);
        if !state.enabled || state.generation != generation || !state.warning_visible {
            return false;
        }
        let remaining = self.remaining_at(state.last_activity_at, Instant::now());
        self.publish(true, true, remaining);
        true
    }

    async fn fire_expiry(self: Arc<Self>, generation: u64) -> Result<(), AuthError> {
        let idle_secs = {
            let mut state = resilient_lock(&self.state);
            if !state.enabled || state.generation != generation {
                return Ok(());
            }
            // Our own handle must not be aborted: the logout below runs in this task.
            drop(state.timers.expiry.take());
            state.timers.cancel_all();
            state.generation += 1;
            state.warning_visible = false;
            self.publish(true, false, 0);

            Instant::now()
                .saturating_duration_since(state.last_activity_at)
                .as_secs()
        };

        tracing::info!("{}", MonitorEvent::Expired { idle_secs }.to_audit_string());

        if let Some(on_timeout) = &self.hooks.on_timeout {
            on_timeout();
        }

        self.run_logout("expired").await
    }

    async fn run_logout(&self, reason: &str) -> Result<(), AuthError> {
        match (self.hooks.logout)().await {
            Ok(()) => {
                self.status.send_modify(|status| status.last_logout_error = None);
                self.teardown(reason);
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    "{}",
                    MonitorEvent::LogoutFailed { reason: err.to_string() }.to_audit_string()
                );
                let message = err.to_string();
                self.status
                    .send_modify(|status| status.last_logout_error = Some(message));
                Err(err)
            }
        }
    }

    fn teardown(&self, reason: &str) {
        let listener = {
            let mut state = resilient_lock(&self.state);
            if !state.enabled {
                return;
            }
            state.enabled = false;
            state.generation += 1;
            state.timers.cancel_all();
            state.warning_visible = false;
            state.last_activity_at = Instant::now();
            self.publish(false, false, self.config.timeout_secs);
            state.listener.take()
        };

        if let Some((id, handle)) = listener {
            handle.abort();
            self.source.unsubscribe(id);
        }

        tracing::info!(
            "{}",
            MonitorEvent::Disabled { reason: reason.to_string() }.to_audit_string()
        );
    }

    fn remaining_at(&self, last_activity_at: Instant, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(last_activity_at).as_secs();
        self.config.timeout_secs.saturating_sub(elapsed)
    }

    fn publish(&self, active: bool, warning_visible: bool, remaining_secs: u64) {
        self.status.send_modify(|status| {
            status.active = active;
            status.warning_visible = warning_visible;
            status.remaining_secs = remaining_secs;
        });
    }
}

fn spawn_listener(
    shared: Weak<Shared>,
    mut signals: mpsc::UnboundedReceiver<ActivityKind>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(kind) = signals.recv().await {
            match shared.upgrade() {
                Some(shared) => shared.reset(ResetTrigger::Activity(kind)),
                None => break,
            }
        }
    })
}

fn spawn_countdown(shared: Weak<Shared>, generation: u64, start: Instant) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(start + COUNTDOWN_TICK, COUNTDOWN_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            if !shared.tick_countdown(generation) {
                break;
            }
        }
    })
}

/// Keep `monitor` enabled exactly while the auth feed reads `true`.
///
/// The monitor is disabled when the feed turns `false` or its sender is
/// dropped; the returned task ends in the latter case.
pub fn bind_to_auth(
    monitor: SessionActivityMonitor,
    mut authenticated: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let is_authenticated = *authenticated.borrow_and_update();
            if is_authenticated {
                monitor.enable();
            } else {
                monitor.disable();
            }

            if authenticated.changed().await.is_err() {
                monitor.disable();
                break;
            }
        }
    })
}
