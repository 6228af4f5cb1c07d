// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local durable member store.
//!
//! One JSON file holds the signed-up member and whether they are signed in.
//! Reads take a shared lock on a sibling `.lock` file; writes take an
//! exclusive one and replace the data file through a temp file + rename, so
//! a crash never leaves half a document behind. [`MemberStore::update`] holds
//! the exclusive lock from the read to the write.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;

use crate::error::StoreError;

/// Timeout for acquiring the store lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval while waiting for the lock.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    Trial,
    Crossfit,
}

impl std::fmt::Display for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Membership::Trial => f.write_str("trial"),
            Membership::Crossfit => f.write_str("crossfit"),
        }
    }
}

/// Public part of a member record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub membership: Membership,
    pub join_date: DateTime<Utc>,
}

/// Member record as persisted, including the salted password digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRecord {
    #[serde(flatten)]
    pub profile: MemberProfile,
    password_salt: String,
    password_digest: String,
}

impl MemberRecord {
    pub fn new(email: &str, name: &str, membership: Membership, password: &str) -> Self {
        let now = Utc::now();
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        let password_salt = hex::encode(salt);
        let password_digest = digest_password(&password_salt, password);

        Self {
            profile: MemberProfile {
                id: now.timestamp_millis().to_string(),
                email: email.to_string(),
                name: name.to_string(),
                membership,
                join_date: now,
            },
            password_salt,
            password_digest,
        }
    }

    /// Constant-time comparison against the stored digest.
    pub fn verify_password(&self, password: &str) -> bool {
        let candidate = digest_password(&self.password_salt, password);
        candidate
            .as_bytes()
            .ct_eq(self.password_digest.as_bytes())
            .into()
    }
}

fn digest_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Everything the store persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredSession {
    pub user: Option<MemberRecord>,
    pub authenticated: bool,
}

/// File-backed member store.
#[derive(Debug, Clone)]
pub struct MemberStore {
    path: PathBuf,
}

impl MemberStore {
    /// Store at `~/.comet-guard/member.json`.
    pub fn open_default() -> Result<Self, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::NoHomeDir)?;
        Ok(Self::at(home.join(".comet-guard").join("member.json")))
    }

    /// Store in `dir/member.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::at(dir.as_ref().join("member.json"))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Load the stored session; a missing file is an empty session.
    pub fn load(&self) -> Result<StoredSession, StoreError> {
        if !self.path.exists() {
            return Ok(StoredSession::default());
        }
        let lock = self.acquire_lock(LockMode::Shared)?;
        let session = self.read_locked();
        let _ = FileExt::unlock(&lock);
        session
    }

    /// Replace the stored session.
    pub fn save(&self, session: &StoredSession) -> Result<(), StoreError> {
        let lock = self.acquire_lock(LockMode::Exclusive)?;
        let written = self.write_locked(session);
        let _ = FileExt::unlock(&lock);
        written
    }

    /// Load, apply `update`, save; the exclusive lock is held throughout.
    pub fn update<F>(&self, update: F) -> Result<StoredSession, StoreError>
    where
        F: FnOnce(&mut StoredSession),
    {
        self.try_update(|session| {
            update(session);
            Ok::<_, StoreError>(session.clone())
        })
    }

    /// Like [`update`](Self::update), but `update` may refuse the change.
    ///
    /// Nothing is written when it returns an error.
    pub fn try_update<F, T, E>(&self, update: F) -> Result<T, E>
    where
        F: FnOnce(&mut StoredSession) -> Result<T, E>,
        E: From<StoreError>,
    {
        let lock = self.acquire_lock(LockMode::Exclusive)?;
        let outcome = self.read_locked().map_err(E::from).and_then(|mut session| {
            let value = update(&mut session)?;
            self.write_locked(&session)?;
            Ok(value)
        });
        // Dropping the handle releases the lock as well.
        let _ = FileExt::unlock(&lock);
        outcome
    }

    fn read_locked(&self) -> Result<StoredSession, StoreError> {
        if !self.path.exists() {
            return Ok(StoredSession::default());
        }
        let content =
            fs::read_to_string(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Temp file + rename. Caller holds the exclusive lock.
    fn write_locked(&self, session: &StoredSession) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(session)?;
        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut file =
                File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;
            file.write_all(content.as_bytes())
                .and_then(|_| file.sync_all())
                .map_err(|e| StoreError::io(&temp_path, e))?;
        }
        fs::rename(&temp_path, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        tracing::debug!(
            "MEMBER_STORE_SAVED | path={} authenticated={}",
            self.path.display(),
            session.authenticated
        );
        Ok(())
    }

    fn acquire_lock(&self, mode: LockMode) -> Result<File, StoreError> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;

        let start = Instant::now();
        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&lock_file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&lock_file),
            };
            match attempt {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= LOCK_TIMEOUT {
                        return Err(StoreError::LockTimeout(lock_path));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(StoreError::io(&lock_path, e)),
            }
        }
    }
}

#[derive(Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}
