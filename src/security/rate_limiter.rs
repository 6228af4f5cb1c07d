// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Failed login attempt limiter.
//!
//! Counts failed attempts per identifier (the member's email) inside a
//! window. Reaching the maximum locks the identifier out for a fixed period.
//!
//! - A record is created on the first failure and dropped on success
//!   ([`AttemptRateLimiter::reset`]) or bulk clear.
//! - A window whose age exceeds the window length (strictly greater) is
//!   restarted at count 1 by the next `record_attempt`. `is_limited` never
//!   prunes.
//! - An active lockout rejects the identifier until it passes, whatever the
//!   window says.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

use super::locks::{resilient_read, resilient_write};
use crate::utils::mask_identifier;

/// Default attempts allowed per window.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default window length: 15 minutes.
pub const DEFAULT_WINDOW_SECS: u64 = 15 * 60;

/// Default lockout length: 5 minutes.
pub const DEFAULT_LOCKOUT_SECS: u64 = 5 * 60;

/// Limiter configuration, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window_secs: u64,
    pub lockout_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window_secs: DEFAULT_WINDOW_SECS,
            lockout_secs: DEFAULT_LOCKOUT_SECS,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn lockout(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }

    /// Lockout length in whole minutes, rounded up.
    pub fn lockout_minutes(&self) -> u64 {
        self.lockout().as_millis().div_ceil(60_000) as u64
    }
}

/// Result of recording one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttemptOutcome {
    /// Whether further attempts are allowed.
    pub allowed: bool,

    pub attempts_remaining: u32,

    /// Set when this attempt triggered a lockout.
    pub lockout_minutes: Option<u64>,
}

#[derive(Debug, Clone)]
struct AttemptRecord {
    count: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

impl AttemptRecord {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
            locked_until: None,
        }
    }

    fn is_locked(&self, now: Instant) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }
}

/// Per-identifier failed attempt tracker.
pub struct AttemptRateLimiter {
    config: RateLimitConfig,
    attempts: RwLock<HashMap<String, AttemptRecord>>,
}

impl Default for AttemptRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl AttemptRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            attempts: RwLock::new(HashMap::new()),
        }
    }

    /// True while a lockout is active for `identifier`.
    pub fn is_limited(&self, identifier: &str) -> bool {
        let now = Instant::now();
        resilient_read(&self.attempts)
            .get(identifier)
            .is_some_and(|record| record.is_locked(now))
    }

    /// Time left on an active lockout.
    pub fn retry_after(&self, identifier: &str) -> Option<Duration> {
        let now = Instant::now();
        resilient_read(&self.attempts)
            .get(identifier)
            .and_then(|record| record.locked_until)
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    /// Record one failed attempt for `identifier`.
    pub fn record_attempt(&self, identifier: &str) -> AttemptOutcome {
        let now = Instant::now();
        let max_attempts = self.config.max_attempts;

        // One guard for the whole check-then-mutate sequence.
        let mut attempts = resilient_write(&self.attempts);

        let record = match attempts.entry(identifier.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(AttemptRecord::fresh(now));
                return self.fresh_outcome();
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        let window_expired =
            now.saturating_duration_since(record.window_start) > self.config.window();
        if window_expired && !record.is_locked(now) {
            *record = AttemptRecord::fresh(now);
            return self.fresh_outcome();
        }

        record.count = record.count.saturating_add(1);

        if record.count >= max_attempts {
            record.locked_until = Some(now + self.config.lockout());
            let minutes = self.config.lockout_minutes();
            tracing::warn!(
                "LOGIN_LOCKOUT | identifier={} attempts={} minutes={}",
                mask_identifier(identifier, 2),
                record.count,
                minutes
            );
            return AttemptOutcome {
                allowed: false,
                attempts_remaining: 0,
                lockout_minutes: Some(minutes),
            };
        }

        AttemptOutcome {
            allowed: true,
            attempts_remaining: max_attempts - record.count,
            lockout_minutes: None,
        }
    }

    fn fresh_outcome(&self) -> AttemptOutcome {
        AttemptOutcome {
            allowed: true,
            attempts_remaining: self.config.max_attempts.saturating_sub(1),
            lockout_minutes: None,
        }
    }

    /// Forget `identifier` (successful sign-in).
    pub fn reset(&self, identifier: &str) {
        resilient_write(&self.attempts).remove(identifier);
    }

    /// Forget every identifier.
    pub fn clear_all(&self) {
        resilient_write(&self.attempts).clear();
    }

    /// Number of identifiers with a live record.
    pub fn tracked_count(&self) -> usize {
        resilient_read(&self.attempts).len()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
