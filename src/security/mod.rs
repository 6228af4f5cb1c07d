// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Security controls for the member area.
//!
//! ## Components
//!
//! - **Session inactivity monitor**: logs the member out after 30 minutes
//!   without activity, with a countdown warning 5 minutes before.
//! - **Login attempt limiter**: 5 failed attempts within 15 minutes lock an
//!   email out for 5 minutes.
//! - **Input helpers**: sanitization, email shape, injection heuristics,
//!   CSRF tokens.
//! - **Breached-password lookup**: advisory, fail-open.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use comet_guard::security::{
//!     ActivityBus, ActivityKind, MonitorConfig, MonitorHooks, SessionActivityMonitor,
//! };
//!
//! # async fn example() {
//! let bus = Arc::new(ActivityBus::new());
//! let hooks = MonitorHooks::new(|| async { Ok(()) })
//!     .on_warning(|| println!("Session expiring soon"));
//! let monitor = SessionActivityMonitor::new(MonitorConfig::default(), hooks, bus.clone());
//!
//! monitor.enable();
//! bus.emit(ActivityKind::KeyPress);
//! # }
//! ```

pub mod activity;
pub mod locks;
pub mod pwned;
pub mod rate_limiter;
pub mod sanitize;
pub mod session_monitor;

pub use activity::{ActivityBus, ActivityKind, ActivitySource, ActivitySubscription, SubscriptionId};
pub use locks::{resilient_lock, resilient_read, resilient_write};
pub use pwned::{BreachCheck, PwnedConfig, PwnedPasswordClient};
pub use rate_limiter::{AttemptOutcome, AttemptRateLimiter, RateLimitConfig};
pub use sanitize::{
    detect_sql_injection, detect_xss, generate_csrf_token, is_valid_email, sanitize_input,
};
pub use session_monitor::{
    bind_to_auth, MonitorConfig, MonitorEvent, MonitorHooks, SessionActivityMonitor,
    SessionStatus, DEFAULT_TIMEOUT_SECS, DEFAULT_WARNING_LEAD_SECS,
};
