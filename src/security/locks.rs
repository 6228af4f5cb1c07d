// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-recovering lock helpers.
//!
//! The session monitor and the attempt limiter keep their state behind std
//! locks that are touched from timer tasks. A panic inside one of those
//! tasks would poison the lock and turn every later activity signal or
//! login attempt into a panic too. These helpers log the poisoning and hand
//! back the guard instead.
//!
//! ```
//! use std::sync::Mutex;
//! use comet_guard::security::locks::resilient_lock;
//!
//! let counter = Mutex::new(0u32);
//! *resilient_lock(&counter) += 1;
//! assert_eq!(*resilient_lock(&counter), 1);
//! ```

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a mutex, recovering the guard if a previous holder panicked.
#[inline]
pub fn resilient_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "security::locks",
            event = "LOCK_POISONED_MUTEX",
            "Mutex was poisoned by a panicking holder. Recovering state; \
             timers and counters may be stale until the next reset."
        );
        poisoned.into_inner()
    })
}

/// Acquire a read lock, recovering from poisoning.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "security::locks",
            event = "LOCK_POISONED_READ",
            "RwLock was poisoned during read acquisition. Recovering state."
        );
        poisoned.into_inner()
    })
}

/// Acquire a write lock, recovering from poisoning.
///
/// Callers doing check-then-mutate must hold this one guard for the whole
/// sequence.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "security::locks",
            event = "LOCK_POISONED_WRITE",
            "RwLock was poisoned during write acquisition. Recovering state."
        );
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_resilient_write_then_read() {
        let lock = RwLock::new(42);
        *resilient_write(&lock) = 100;
        assert_eq!(*resilient_read(&lock), 100);
    }

    #[test]
    fn test_resilient_lock_poisoned() {
        let lock = Arc::new(Mutex::new(vec![1, 2]));
        let lock_clone = Arc::clone(&lock);

        let handle = thread::spawn(move || {
            let mut guard = lock_clone.lock().unwrap();
            guard.push(3);
            panic!("intentional panic to poison lock");
        });
        let _ = handle.join();

        assert!(lock.is_poisoned());
        let guard = resilient_lock(&lock);
        assert_eq!(*guard, vec![1, 2, 3]);
    }

    #[test]
    fn test_resilient_write_poisoned() {
        let lock = Arc::new(RwLock::new(42));
        let lock_clone = Arc::clone(&lock);

        let handle = thread::spawn(move || {
            let _guard = lock_clone.write().unwrap();
            panic!("intentional panic to poison lock");
        });
        let _ = handle.join();

        *resilient_write(&lock) = 7;
        assert_eq!(*resilient_read(&lock), 7);
    }
}
