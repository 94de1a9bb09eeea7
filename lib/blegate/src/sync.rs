// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Synchronization wrappers with usage contracts in their names.
//!
//! Everything here is a thin shell around `std::sync::Mutex`; the two
//! types differ only in the contract their holders sign up for.

use core::ops::Deref;
use core::ops::DerefMut;
use std::sync::Mutex;
use std::sync::MutexGuard;

/// A mutex guarding a short, bounded critical section.
///
/// Holders may inspect or mutate the protected value but must not
/// perform I/O, call into platform providers, or block while the
/// guard is live. The packet path takes these locks.
pub struct ShortMutex<T> {
    inner: Mutex<T>,
}

pub struct ShortMutexGuard<'a, T: 'a> {
    guard: MutexGuard<'a, T>,
}

impl<T> ShortMutex<T> {
    pub fn new(val: T) -> Self {
        ShortMutex { inner: Mutex::new(val) }
    }

    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.inner.into_inner().unwrap()
    }

    pub fn lock(&self) -> ShortMutexGuard<'_, T> {
        let guard = self.inner.lock().unwrap();
        ShortMutexGuard { guard }
    }
}

impl<T> Deref for ShortMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for ShortMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

/// A mutex guarding control-path state.
///
/// Holders may call out to platform providers and the persistent
/// store while holding the guard. Never acquire an [`AdminMutex`]
/// while holding a [`ShortMutex`]; the packet path must not be made
/// to wait on provider calls.
pub struct AdminMutex<T> {
    inner: Mutex<T>,
}

pub struct AdminMutexGuard<'a, T: 'a> {
    guard: MutexGuard<'a, T>,
}

impl<T> AdminMutex<T> {
    pub fn new(val: T) -> Self {
        AdminMutex { inner: Mutex::new(val) }
    }

    pub fn lock(&self) -> AdminMutexGuard<'_, T> {
        let guard = self.inner.lock().unwrap();
        AdminMutexGuard { guard }
    }
}

impl<T> Deref for AdminMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for AdminMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}
