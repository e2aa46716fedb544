// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared memory primitives.
//!
//! Named POSIX shared memory objects mapped per process, and the locks that
//! live inside them.

mod lock;
mod region;

pub use lock::{
    ShmLockGuard, ShmMutex, ShmMutexGuard, ShmReadGuard, ShmRwLock, ShmWriteGuard,
};
pub use region::SharedMemoryRegion;
