// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! comet-guard - security core for the CrossFit Comet member area
//!
//! Signed-in members are logged out after a stretch of inactivity, with a
//! countdown warning shortly before; repeated failed sign-ins lock an email
//! out for a while.
//!
//! # Core Modules
//!
//! - [`security`] - Session inactivity monitor, login attempt limiter, input helpers
//! - [`auth`] - Mock member sign-in/sign-up over a local store
//! - [`config`] - `~/.comet-guard/config.json`
//! - [`error`] - Typed library errors
//! - [`utils`] - Masking and formatting helpers

pub mod auth;
pub mod config;
pub mod error;
pub mod security;
pub mod utils;

pub use auth::{AuthService, LoginForm, MemberProfile, MemberStore, SignUpOutcome};
pub use config::GuardConfig;
pub use error::{AuthError, ConfigError, StoreError};
pub use security::{
    bind_to_auth, ActivityBus, ActivityKind, AttemptOutcome, AttemptRateLimiter, MonitorConfig,
    MonitorHooks, RateLimitConfig, SessionActivityMonitor, SessionStatus,
};
