// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for comet-guard.
//!
//! The library reports typed errors; the binary wraps them with `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the member store on disk.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Could not find home directory")]
    NoHomeDir,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Member store is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(PathBuf),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by the authentication flow and the logout hook.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Form input rejected before any credential check.
    #[error("{0}")]
    Validation(String),

    #[error("Invalid email or password. {attempts_remaining} attempt(s) remaining.")]
    InvalidCredentials { attempts_remaining: u32 },

    #[error("Too many failed attempts. Try again in {minutes} minute(s).")]
    LockedOut { minutes: u64 },

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Member storage failed: {0}")]
    Storage(#[from] StoreError),

    #[error("Background task failed: {0}")]
    Background(#[from] tokio::task::JoinError),
}

impl AuthError {
    pub(crate) fn validation(message: &str) -> Self {
        Self::Validation(message.to_string())
    }

    /// True when the error came from user input rather than the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidCredentials { .. } | Self::LockedOut { .. }
        )
    }
}

/// Errors loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not find home directory")]
    NoHomeDir,

    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
