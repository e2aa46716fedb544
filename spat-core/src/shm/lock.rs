// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Locks that live inside shared memory.
//!
//! Every attached process sees the same lock word, so these work across
//! process boundaries as well as between threads. An all-zero lock word is
//! an unlocked lock, which lets freshly created shared objects start out
//! usable without an initialization pass.
//!
//! Waiting spins briefly and then yields to the scheduler. Critical
//! sections guarded by these locks are short and never block on I/O.

use std::sync::atomic::{AtomicU32, Ordering};

/// Exclusive holder bit.
const WRITER: u32 = 1 << 31;
/// Set by a blocked writer so new readers back off.
const WRITER_WAITING: u32 = 1 << 30;
const READER_MASK: u32 = WRITER_WAITING - 1;

/// Spin iterations before yielding the CPU.
const SPIN_LIMIT: u32 = 64;

struct Backoff {
    step: u32,
}

impl Backoff {
    fn new() -> Self {
        Self { step: 0 }
    }

    fn snooze(&mut self) {
        if self.step < SPIN_LIMIT {
            std::hint::spin_loop();
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
    }
}

/// Reader/writer lock stored in shared memory.
///
/// Writers announce themselves with a waiting bit so a steady stream of
/// readers cannot starve them.
#[repr(C)]
#[derive(Debug)]
pub struct ShmRwLock {
    state: AtomicU32,
}

impl ShmRwLock {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
        }
    }

    /// Acquire in shared mode.
    pub fn read(&self) -> ShmReadGuard<'_> {
        let mut backoff = Backoff::new();
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state & (WRITER | WRITER_WAITING) == 0
                && (state & READER_MASK) < READER_MASK
                && self
                    .state
                    .compare_exchange_weak(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return ShmReadGuard { lock: self };
            }
            backoff.snooze();
        }
    }

    /// Acquire in exclusive mode.
    pub fn write(&self) -> ShmWriteGuard<'_> {
        let mut backoff = Backoff::new();
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state & (WRITER | READER_MASK) == 0 {
                // Free, possibly with the waiting bit set (ours or another writer's).
                if self
                    .state
                    .compare_exchange_weak(state, WRITER, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return ShmWriteGuard { lock: self };
                }
            } else if state & WRITER_WAITING == 0 {
                self.state.fetch_or(WRITER_WAITING, Ordering::Relaxed);
            }
            backoff.snooze();
        }
    }

    /// Acquire in either mode.
    pub fn lock(&self, exclusive: bool) -> ShmLockGuard<'_> {
        if exclusive {
            ShmLockGuard::Exclusive(self.write())
        } else {
            ShmLockGuard::Shared(self.read())
        }
    }

    /// True while some holder has the lock exclusively.
    #[cfg(test)]
    fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & WRITER != 0
    }

    /// Number of shared holders right now.
    #[cfg(test)]
    fn readers(&self) -> u32 {
        self.state.load(Ordering::Relaxed) & READER_MASK
    }
}

impl Default for ShmRwLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared hold on a [`ShmRwLock`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ShmReadGuard<'a> {
    lock: &'a ShmRwLock,
}

impl Drop for ShmReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

/// Exclusive hold on a [`ShmRwLock`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ShmWriteGuard<'a> {
    lock: &'a ShmRwLock,
}

impl Drop for ShmWriteGuard<'_> {
    fn drop(&mut self) {
        // Keep WRITER_WAITING: another writer may have announced itself meanwhile.
        self.lock.state.fetch_and(!WRITER, Ordering::Release);
    }
}

/// Hold on a [`ShmRwLock`] in a mode picked at runtime.
pub enum ShmLockGuard<'a> {
    Shared(ShmReadGuard<'a>),
    Exclusive(ShmWriteGuard<'a>),
}

impl ShmLockGuard<'_> {
    pub(crate) fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive(_))
    }
}

/// Plain mutual exclusion stored in shared memory.
#[repr(C)]
#[derive(Debug)]
pub struct ShmMutex {
    locked: AtomicU32,
}

impl ShmMutex {
    pub const fn new() -> Self {
        Self {
            locked: AtomicU32::new(0),
        }
    }

    pub fn lock(&self) -> ShmMutexGuard<'_> {
        let mut backoff = Backoff::new();
        loop {
            if self
                .locked
                .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return ShmMutexGuard { mutex: self };
            }
            backoff.snooze();
        }
    }
}

impl Default for ShmMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct ShmMutexGuard<'a> {
    mutex: &'a ShmMutex,
}

impl Drop for ShmMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.locked.store(0, Ordering::Release);
    }
}
