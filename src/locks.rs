// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant lock helpers.
//!
//! A panic while a writer holds a `std::sync::RwLock` poisons it. The data
//! guarded here (an `Arc` to an immutable cache snapshot, a session flag) is
//! always replaced wholesale, so a poisoned lock never holds a half-written
//! value and the guard is recovered instead of propagating the panic.
//!
//! ```no_run
//! use std::sync::RwLock;
//! use xunity_installer::locks::{resilient_read, resilient_write};
//!
//! let lock = RwLock::new(42);
//! println!("Value: {}", *resilient_read(&lock));
//! *resilient_write(&lock) = 100;
//! ```

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "locks",
                event = "LOCK_POISONED_READ",
                "RwLock was poisoned during read acquisition; recovering the last stored value"
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "locks",
                event = "LOCK_POISONED_WRITE",
                "RwLock was poisoned during write acquisition; recovering the last stored value"
            );
            poisoned.into_inner()
        }
    }
}
