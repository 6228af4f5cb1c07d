// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sign-in / sign-up form input.

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::security::is_valid_email;

/// Shortest accepted password.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Login,
    Signup,
}

/// Raw form fields as typed by the member.
#[derive(Debug, Clone)]
pub struct LoginForm {
    pub mode: AuthMode,
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

impl LoginForm {
    pub fn login(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            mode: AuthMode::Login,
            email: email.into(),
            password: password.into(),
            name: None,
        }
    }

    pub fn signup(
        email: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            mode: AuthMode::Signup,
            email: email.into(),
            password: password.into(),
            name: Some(name.into()),
        }
    }

    /// Check the fields in the order the form reports problems.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            return Err(AuthError::validation("Please fill in all required fields"));
        }

        if self.mode == AuthMode::Signup && self.display_name().is_none() {
            return Err(AuthError::validation("Please enter your name"));
        }

        if !is_valid_email(self.email.trim()) {
            return Err(AuthError::validation("Please enter a valid email address"));
        }

        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::validation(
                "Password must be at least 6 characters",
            ));
        }

        Ok(())
    }

    /// Key used for attempt limiting and member lookup.
    pub fn identifier(&self) -> String {
        self.email.trim().to_lowercase()
    }

    /// Trimmed, non-empty name.
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}
