// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Mock member authentication.
//!
//! Simulates sign-in and sign-up against a single locally stored member.
//! There is no server: the member record and the signed-in flag live in the
//! [`MemberStore`] file. The service is the collaborator the security core
//! talks to:
//!
//! - failed password checks go through [`AttemptRateLimiter`];
//! - the signed-in flag is published on a watch channel that
//!   [`bind_to_auth`](crate::security::bind_to_auth) follows;
//! - [`AuthService::logout_action`] is the session monitor's logout hook.

pub mod form;
pub mod store;

pub use form::{AuthMode, LoginForm, MIN_PASSWORD_LEN};
pub use store::{MemberProfile, MemberRecord, MemberStore, Membership, StoredSession};

use futures_util::future::FutureExt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::AuthError;
use crate::security::session_monitor::LogoutFn;
use crate::security::{AttemptRateLimiter, BreachCheck, PwnedPasswordClient};
use crate::utils::mask_identifier;

/// Result of a successful sign-up.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub profile: MemberProfile,

    /// Advisory breach lookup for the chosen password.
    pub breach: BreachCheck,
}

/// Sign-in, sign-up and logout over the local member store.
pub struct AuthService {
    store: MemberStore,
    limiter: Arc<AttemptRateLimiter>,
    pwned: Option<PwnedPasswordClient>,
    authenticated: watch::Sender<bool>,
}

impl AuthService {
    /// Build the service, restoring the signed-in flag from the store.
    pub fn new(
        store: MemberStore,
        limiter: Arc<AttemptRateLimiter>,
        pwned: Option<PwnedPasswordClient>,
    ) -> Result<Self, AuthError> {
        let stored = store.load()?;
        let signed_in = stored.authenticated && stored.user.is_some();
        let (authenticated, _) = watch::channel(signed_in);

        Ok(Self {
            store,
            limiter,
            pwned,
            authenticated,
        })
    }

    /// Feed of the signed-in flag.
    pub fn auth_state(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        *self.authenticated.borrow()
    }

    pub fn limiter(&self) -> &Arc<AttemptRateLimiter> {
        &self.limiter
    }

    /// The stored member, if any.
    pub fn current_member(&self) -> Result<Option<MemberProfile>, AuthError> {
        Ok(self.store.load()?.user.map(|record| record.profile))
    }

    /// Sign in.
    ///
    /// A stored member with this email must match the password; a failed
    /// match counts against the email's attempt budget. An unknown email
    /// becomes the stored member (mock behaviour).
    pub fn sign_in(&self, form: &LoginForm) -> Result<MemberProfile, AuthError> {
        form.validate()?;
        let identifier = form.identifier();
        self.ensure_not_limited(&identifier)?;

        let profile = self.store.try_update(|stored| {
            let existing = stored
                .user
                .as_ref()
                .filter(|record| record.profile.email.eq_ignore_ascii_case(&identifier));

            let profile = match existing {
                Some(record) if record.verify_password(&form.password) => record.profile.clone(),
                Some(_) => return Err(self.record_failure(&identifier)),
                None => {
                    let name = identifier.split('@').next().unwrap_or_default().to_string();
                    let record =
                        MemberRecord::new(&identifier, &name, Membership::Crossfit, &form.password);
                    let profile = record.profile.clone();
                    stored.user = Some(record);
                    profile
                }
            };
            stored.authenticated = true;
            Ok(profile)
        })?;
        self.limiter.reset(&identifier);
        self.authenticated.send_replace(true);

        tracing::info!(
            "MEMBER_SIGNED_IN | member={} membership={}",
            mask_identifier(&identifier, 2),
            profile.membership
        );
        Ok(profile)
    }

    /// Create the member (trial membership) and sign them in.
    ///
    /// The breached-password lookup runs first when configured; its result is
    /// returned but never blocks the sign-up.
    pub async fn sign_up(&self, form: &LoginForm) -> Result<SignUpOutcome, AuthError> {
        form.validate()?;
        let name = form
            .display_name()
            .ok_or_else(|| AuthError::validation("Please enter your name"))?
            .to_string();
        let identifier = form.identifier();
        self.ensure_not_limited(&identifier)?;

        let breach = match &self.pwned {
            Some(client) => client.check(&form.password).await,
            None => BreachCheck::default(),
        };
        if breach.compromised {
            tracing::warn!(
                "MEMBER_SIGNUP_WEAK_PASSWORD | member={} breaches={}",
                mask_identifier(&identifier, 2),
                breach.count.unwrap_or_default()
            );
        }

        let record = MemberRecord::new(&identifier, &name, Membership::Trial, &form.password);
        let profile = record.profile.clone();
        self.store.update(|stored| {
            *stored = StoredSession {
                user: Some(record),
                authenticated: true,
            }
        })?;
        self.limiter.reset(&identifier);
        self.authenticated.send_replace(true);

        tracing::info!("MEMBER_SIGNED_UP | member={}", mask_identifier(&identifier, 2));
        Ok(SignUpOutcome { profile, breach })
    }

    /// Clear the signed-in flag.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.store.update(|stored| stored.authenticated = false)?;
        self.authenticated.send_replace(false);
        tracing::info!("MEMBER_LOGGED_OUT");
        Ok(())
    }

    /// Logout hook for the session monitor.
    pub fn logout_action(self: &Arc<Self>) -> LogoutFn {
        let service = Arc::clone(self);
        Arc::new(move || {
            let service = Arc::clone(&service);
            async move {
                // Store I/O may wait on the file lock.
                tokio::task::spawn_blocking(move || service.logout()).await?
            }
            .boxed()
        })
    }

    fn ensure_not_limited(&self, identifier: &str) -> Result<(), AuthError> {
        if !self.limiter.is_limited(identifier) {
            return Ok(());
        }
        let minutes = self
            .limiter
            .retry_after(identifier)
            .map(|left| left.as_millis().div_ceil(60_000) as u64)
            .unwrap_or_else(|| self.limiter.config().lockout_minutes());
        Err(AuthError::LockedOut { minutes })
    }

    fn record_failure(&self, identifier: &str) -> AuthError {
        let outcome = self.limiter.record_attempt(identifier);
        tracing::info!(
            "MEMBER_SIGN_IN_FAILED | member={} remaining={}",
            mask_identifier(identifier, 2),
            outcome.attempts_remaining
        );
        if outcome.allowed {
            AuthError::InvalidCredentials {
                attempts_remaining: outcome.attempts_remaining,
            }
        } else {
            AuthError::LockedOut {
                minutes: outcome
                    .lockout_minutes
                    .unwrap_or_else(|| self.limiter.config().lockout_minutes()),
            }
        }
    }
}
