// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! SharedMemoryRegion - POSIX shared memory wrapper.
//!
//! Provides safe abstraction over mmap and shm_open for named objects that
//! several processes map independently. The same object lands at a
//! different address in every process, which is why nothing stored inside
//! a region may contain a raw pointer.

use std::ffi::CString;
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use nix::errno::Errno;

use crate::error::SharedMemoryError;

/// How long `open` waits for a creator to finish sizing the object.
const SIZE_WAIT: Duration = Duration::from_secs(5);

/// Represents a mapped shared memory region.
///
/// This struct owns the local mapping and unmaps it on drop. The named
/// object itself outlives every mapping until [`SharedMemoryRegion::unlink`]
/// is called.
pub struct SharedMemoryRegion {
    /// Name of the shared memory object (without the leading slash).
    name: String,
    /// Pointer to the mapped memory.
    ptr: NonNull<u8>,
    /// Size of the mapped region in bytes.
    size: usize,
    /// File descriptor for the shared memory object.
    fd: i32,
}

// SAFETY: SharedMemoryRegion can be sent between threads as it owns its mapping.
unsafe impl Send for SharedMemoryRegion {}

// SAFETY: SharedMemoryRegion only hands out raw pointers; everything that
// dereferences them synchronizes through locks stored inside the region.
unsafe impl Sync for SharedMemoryRegion {}

fn object_name(name: &str) -> Result<CString, SharedMemoryError> {
    if name.is_empty() {
        return Err(SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason: "Name cannot be empty".to_string(),
        });
    }

    CString::new(format!("/{}", name)).map_err(|e| SharedMemoryError::CreateFailed {
        name: name.to_string(),
        reason: format!("Invalid name: {}", e),
    })
}

impl SharedMemoryRegion {
    /// Maximum size for a single shared memory region (16 GB).
    pub const MAX_SIZE: usize = 16 * 1024 * 1024 * 1024;

    /// Create a new shared memory object and map it.
    ///
    /// Creation is exclusive: if another process already created an object
    /// with this name, `SharedMemoryError::AlreadyExists` is returned and
    /// nothing is modified. Fresh objects read as zeros.
    pub fn create(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        if size == 0 || size > Self::MAX_SIZE {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("Size {} outside 1..={}", size, Self::MAX_SIZE),
            });
        }

        let c_name = object_name(name)?;

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd < 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EEXIST) {
                return Err(SharedMemoryError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", errno),
            });
        }

        // SAFETY: fd is a valid file descriptor
        let result = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if result < 0 {
            let errno = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("ftruncate failed: {}", errno),
            });
        }

        let ptr = match Self::map(fd, size) {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };

        tracing::debug!(name = %name, size = size, "Created shared memory region");

        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
        })
    }

    /// Open an existing shared memory object and map its first `size` bytes.
    ///
    /// A concurrent creator may not have sized the object yet; this waits
    /// (bounded) until it is at least `size` bytes long.
    pub fn open(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        if size == 0 || size > Self::MAX_SIZE {
            return Err(SharedMemoryError::OpenFailed {
                name: name.to_string(),
                reason: format!("Invalid size: {}", size),
            });
        }

        let c_name = object_name(name)?;

        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            return Err(SharedMemoryError::OpenFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", std::io::Error::last_os_error()),
            });
        }

        let started = Instant::now();
        loop {
            match Self::object_len(fd) {
                Ok(len) if len >= size => break,
                Ok(_) if started.elapsed() < SIZE_WAIT => std::thread::yield_now(),
                Ok(len) => {
                    unsafe { libc::close(fd) };
                    return Err(SharedMemoryError::OpenFailed {
                        name: name.to_string(),
                        reason: format!("object is {} bytes, expected {}", len, size),
                    });
                }
                Err(reason) => {
                    unsafe { libc::close(fd) };
                    return Err(SharedMemoryError::OpenFailed {
                        name: name.to_string(),
                        reason,
                    });
                }
            }
        }

        let ptr = match Self::map(fd, size) {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        tracing::debug!(name = %name, size = size, "Opened shared memory region");

        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
        })
    }

    /// Remove a named object. Existing mappings stay valid until dropped.
    ///
    /// Returns `false` if no object with that name existed.
    pub fn unlink(name: &str) -> Result<bool, SharedMemoryError> {
        match nix::sys::mman::shm_unlink(format!("/{}", name).as_str()) {
            Ok(()) => {
                tracing::debug!(name = %name, "Unlinked shared memory region");
                Ok(true)
            }
            Err(Errno::ENOENT) => Ok(false),
            Err(e) => Err(SharedMemoryError::UnlinkFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn object_len(fd: i32) -> Result<usize, String> {
        // SAFETY: an all-zero stat is a valid out-parameter
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: fd is valid, stat is a valid out-pointer
        if unsafe { libc::fstat(fd, &mut stat) } < 0 {
            return Err(format!("fstat failed: {}", std::io::Error::last_os_error()));
        }
        Ok(stat.st_size as usize)
    }

    fn map(fd: i32, size: usize) -> Result<NonNull<u8>, SharedMemoryError> {
        // SAFETY: fd is valid, size is validated, offset 0 is valid
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(SharedMemoryError::MapFailed {
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }

        NonNull::new(ptr as *mut u8).ok_or_else(|| SharedMemoryError::MapFailed {
            reason: "mmap returned null".to_string(),
        })
    }

    /// Get the name of this shared memory region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the size of this shared memory region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get a raw pointer to the start of the local mapping.
    ///
    /// Caller must ensure proper synchronization when accessing the memory.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and size were set during mapping
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) };
        if result < 0 {
            tracing::error!(
                name = %self.name,
                error = %std::io::Error::last_os_error(),
                "Failed to unmap shared memory"
            );
        }

        // SAFETY: fd was opened during creation
        unsafe { libc::close(self.fd) };
    }
}
