// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Growable shared-memory arena with offset-based pointers.
//!
//! An arena is a list of named shared memory segments. Segment 0 starts
//! with the [`ArenaControl`] header that every attached process reads; later
//! segments are created on demand when the arena runs out of room and are
//! mapped lazily by other processes the first time one of their pointers is
//! resolved.
//!
//! # Layout
//!
//! ```text
//! segment 0: [ArenaControl][block][block]...
//! segment n: [reserved 64 B][block][block]...
//!
//! block:     [BlockHeader 16 B][payload ...]   (power-of-two size, >= 32 B)
//! ```
//!
//! Allocation pops a per-size-class free list, else bumps the newest
//! segment, else creates a new segment. All of it runs under one mutex in
//! the control header, so processes never need external locking around
//! `allocate`/`free`.

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::config::ArenaConfig;
use crate::error::{SharedMemoryError, SpatError, SpatResult};
use crate::shm::{SharedMemoryRegion, ShmMutex, ShmMutexGuard};
use crate::types::Namespace;

/// Magic number identifying an initialized arena control header.
const ARENA_MAGIC: u64 = 0x5350_4154_4152_454E; // "SPATAREN"

const BLOCK_LIVE: u32 = 0x5350_4C56;
const BLOCK_FREE: u32 = 0x5350_4652;

/// Maximum number of segments an arena can grow to.
pub const MAX_SEGMENTS: usize = 256;

/// Size of the header in front of every allocation. Keeps payloads 16-aligned.
const BLOCK_HEADER_SIZE: usize = 16;

const MIN_CLASS_LOG2: u32 = 5;
const NUM_CLASSES: usize = 36;

/// Largest payload a single allocation can hold.
pub const MAX_ALLOCATION: usize = (1usize << (MIN_CLASS_LOG2 as usize + NUM_CLASSES - 1))
    - BLOCK_HEADER_SIZE;

/// Offset where blocks start in segments other than the first.
const SEGMENT_DATA_START: u64 = 64;

/// Segment sizes stop doubling after this many segments.
const MAX_GROWTH_SHIFT: usize = 10;

const PAGE_SIZE: usize = 4096;

const SEGMENT_SHIFT: u32 = 48;
const OFFSET_MASK: u64 = (1 << SEGMENT_SHIFT) - 1;

/// Offset-based pointer into an arena.
///
/// The high 16 bits select the segment, the low 48 bits are a byte offset
/// inside it. Meaningless without an attached [`Arena`] to resolve it.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ArenaPtr(u64);

impl ArenaPtr {
    pub const NULL: Self = Self(0);

    pub const fn new(segment: usize, offset: u64) -> Self {
        Self(((segment as u64) << SEGMENT_SHIFT) | (offset & OFFSET_MASK))
    }

    pub const fn segment(&self) -> usize {
        (self.0 >> SEGMENT_SHIFT) as usize
    }

    pub const fn offset(&self) -> u64 {
        self.0 & OFFSET_MASK
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    const fn byte_add(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }

    const fn byte_sub(self, bytes: u64) -> Self {
        Self(self.0 - bytes)
    }
}

impl fmt::Display for ArenaPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.segment(), self.offset())
    }
}

/// Identifies one arena across processes.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaHandle(u64);

impl ArenaHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let pid = nix::unistd::getpid().as_raw() as u64;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut h = nanos ^ pid.rotate_left(32) ^ seq.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        Self(h)
    }
}

impl fmt::Display for ArenaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Header at the start of segment 0.
///
/// Atomics throughout so that every field can be read through a shared
/// reference; the mutable allocator state (`segment_used`, `free_lists`) is
/// only touched while `mutex` is held.
#[repr(C)]
struct ArenaControl {
    magic: AtomicU64,
    handle: AtomicU64,
    mutex: ShmMutex,
    segment_count: AtomicU32,
    max_total_bytes: AtomicU64,
    initial_segment_size: AtomicU64,
    total_bytes: AtomicU64,
    allocated_bytes: AtomicU64,
    segment_sizes: [AtomicU64; MAX_SEGMENTS],
    segment_used: [AtomicU64; MAX_SEGMENTS],
    free_lists: [AtomicU64; NUM_CLASSES],
}

const CONTROL_SIZE: u64 = std::mem::size_of::<ArenaControl>() as u64;
const SEGMENT0_DATA_START: u64 = (CONTROL_SIZE + 63) & !63;

#[repr(C)]
struct BlockHeader {
    magic: AtomicU32,
    class: AtomicU32,
    /// Next free block while on a free list.
    next_free: AtomicU64,
}

/// Snapshot of arena usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    pub segments: usize,
    pub total_bytes: u64,
    pub allocated_bytes: u64,
}

const fn class_block_size(class: usize) -> usize {
    1usize << (class + MIN_CLASS_LOG2 as usize)
}

fn size_class(size: usize) -> Option<usize> {
    let block = size.checked_add(BLOCK_HEADER_SIZE)?.max(1 << MIN_CLASS_LOG2);
    let log2 = block.checked_next_power_of_two()?.trailing_zeros();
    let class = (log2 - MIN_CLASS_LOG2) as usize;
    (class < NUM_CLASSES).then_some(class)
}

/// A process-local attachment to a shared arena.
///
/// Mappings are only added while attached and all of them are released on
/// drop, so an address obtained from [`Arena::resolve`] stays valid for as
/// long as the `Arena` it came from is alive.
pub struct Arena {
    handle: ArenaHandle,
    namespace: Namespace,
    control: NonNull<ArenaControl>,
    segments: RwLock<Vec<Option<SharedMemoryRegion>>>,
}

// SAFETY: the control pointer targets segment 0, owned by `segments`; all
// shared state behind it is atomics or guarded by the in-arena mutex.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Create a brand-new arena with its first segment.
    pub fn create(namespace: &Namespace, config: &ArenaConfig) -> SpatResult<Self> {
        let size = config.initial_segment_size;
        if (size as u64) < SEGMENT0_DATA_START + PAGE_SIZE as u64 {
            return Err(SpatError::invariant(format!(
                "initial segment of {} bytes cannot hold the arena header",
                size
            )));
        }

        let mut attempts = 0;
        let (handle, region) = loop {
            let handle = ArenaHandle::generate();
            match SharedMemoryRegion::create(&namespace.segment_object(handle.0, 0), size) {
                Ok(region) => break (handle, region),
                Err(SharedMemoryError::AlreadyExists { .. }) if attempts < 8 => attempts += 1,
                Err(e) => return Err(e.into()),
            }
        };

        let control = NonNull::new(region.as_ptr() as *mut ArenaControl)
            .ok_or_else(|| SpatError::invariant("segment 0 mapped at null"))?;

        // SAFETY: the object is freshly created and zero-filled; zero is a
        // valid bit pattern for every field of ArenaControl.
        let ctrl = unsafe { control.as_ref() };
        ctrl.handle.store(handle.0, Ordering::Relaxed);
        ctrl.segment_count.store(1, Ordering::Relaxed);
        ctrl.max_total_bytes
            .store(config.max_total_size as u64, Ordering::Relaxed);
        ctrl.initial_segment_size
            .store(size as u64, Ordering::Relaxed);
        ctrl.total_bytes.store(size as u64, Ordering::Relaxed);
        ctrl.segment_sizes[0].store(size as u64, Ordering::Relaxed);
        ctrl.segment_used[0].store(SEGMENT0_DATA_START, Ordering::Relaxed);
        ctrl.magic.store(ARENA_MAGIC, Ordering::Release);

        tracing::debug!(handle = %handle, size = size, "Created arena");

        Ok(Self {
            handle,
            namespace: namespace.clone(),
            control,
            segments: RwLock::new(vec![Some(region)]),
        })
    }

    /// Attach to an arena some process created earlier.
    pub fn attach(namespace: &Namespace, handle: ArenaHandle) -> SpatResult<Self> {
        let name = namespace.segment_object(handle.0, 0);
        let region = SharedMemoryRegion::open(&name, CONTROL_SIZE as usize)?;
        let control = NonNull::new(region.as_ptr() as *mut ArenaControl)
            .ok_or_else(|| SpatError::invariant("segment 0 mapped at null"))?;

        // SAFETY: the region is at least CONTROL_SIZE bytes long.
        let ctrl = unsafe { control.as_ref() };
        if ctrl.magic.load(Ordering::Acquire) != ARENA_MAGIC
            || ctrl.handle.load(Ordering::Relaxed) != handle.0
        {
            return Err(SpatError::invariant(format!(
                "arena {} has a corrupt control header",
                handle
            )));
        }

        // Remap with the real size so segment 0's blocks are addressable.
        let size = ctrl.segment_sizes[0].load(Ordering::Relaxed) as usize;
        drop(region);
        let region = SharedMemoryRegion::open(&name, size)?;
        let control = NonNull::new(region.as_ptr() as *mut ArenaControl)
            .ok_or_else(|| SpatError::invariant("segment 0 mapped at null"))?;

        tracing::debug!(handle = %handle, "Attached arena");

        Ok(Self {
            handle,
            namespace: namespace.clone(),
            control,
            segments: RwLock::new(vec![Some(region)]),
        })
    }

    fn ctrl(&self) -> &ArenaControl {
        // SAFETY: segment 0 stays mapped for the lifetime of self.
        unsafe { self.control.as_ref() }
    }

    pub fn handle(&self) -> ArenaHandle {
        self.handle
    }

    /// Total bytes of shared memory backing this arena (all segments).
    pub fn total_bytes(&self) -> u64 {
        self.ctrl().total_bytes.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ArenaStats {
        let ctrl = self.ctrl();
        ArenaStats {
            segments: ctrl.segment_count.load(Ordering::Acquire) as usize,
            total_bytes: ctrl.total_bytes.load(Ordering::Relaxed),
            allocated_bytes: ctrl.allocated_bytes.load(Ordering::Relaxed),
        }
    }

    /// Allocate `size` bytes. The contents are unspecified.
    pub fn allocate(&self, size: usize) -> SpatResult<ArenaPtr> {
        let class = size_class(size).ok_or(SpatError::OutOfMemory { requested: size })?;
        let block_size = class_block_size(class) as u64;

        let ctrl = self.ctrl();
        let guard = ctrl.mutex.lock();

        let block = match ArenaPtr(ctrl.free_lists[class].load(Ordering::Relaxed)) {
            head if !head.is_null() => {
                let header = self.block_header(head)?;
                if header.magic.load(Ordering::Relaxed) != BLOCK_FREE {
                    return Err(SpatError::invariant(format!(
                        "free list {} holds a block in use at {}",
                        class, head
                    )));
                }
                ctrl.free_lists[class]
                    .store(header.next_free.load(Ordering::Relaxed), Ordering::Relaxed);
                head
            }
            _ => self.bump(&guard, block_size, size)?,
        };

        let header = self.block_header(block)?;
        header.magic.store(BLOCK_LIVE, Ordering::Relaxed);
        header.class.store(class as u32, Ordering::Relaxed);
        header.next_free.store(0, Ordering::Relaxed);
        ctrl.allocated_bytes.fetch_add(block_size, Ordering::Relaxed);
        drop(guard);

        Ok(block.byte_add(BLOCK_HEADER_SIZE as u64))
    }

    /// Allocate `size` zero-filled bytes.
    pub fn allocate_zeroed(&self, size: usize) -> SpatResult<ArenaPtr> {
        let ptr = self.allocate(size)?;
        let addr = self.resolve(ptr)?;
        // SAFETY: the block holds at least `size` payload bytes.
        unsafe { std::ptr::write_bytes(addr.as_ptr(), 0, size) };
        Ok(ptr)
    }

    /// Allocate room for one `T` and move `value` into it.
    pub(crate) fn allocate_value<T: Copy>(&self, value: T) -> SpatResult<ArenaPtr> {
        debug_assert!(std::mem::align_of::<T>() <= BLOCK_HEADER_SIZE);
        let ptr = self.allocate(std::mem::size_of::<T>())?;
        let addr = self.resolve_as::<T>(ptr)?;
        // SAFETY: freshly allocated, correctly sized and 16-aligned.
        unsafe { addr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Return an allocation to the arena. Freeing `ArenaPtr::NULL` is a no-op.
    pub fn free(&self, ptr: ArenaPtr) -> SpatResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        if ptr.offset() < BLOCK_HEADER_SIZE as u64 {
            return Err(SpatError::invariant(format!("free of invalid pointer {}", ptr)));
        }

        let block = ptr.byte_sub(BLOCK_HEADER_SIZE as u64);
        let header = self.block_header(block)?;

        let ctrl = self.ctrl();
        let _guard = ctrl.mutex.lock();

        if header.magic.load(Ordering::Relaxed) != BLOCK_LIVE {
            return Err(SpatError::invariant(format!(
                "free of a block that is not allocated at {}",
                ptr
            )));
        }
        let class = header.class.load(Ordering::Relaxed) as usize;
        if class >= NUM_CLASSES {
            return Err(SpatError::invariant(format!(
                "block at {} has corrupt size class {}",
                ptr, class
            )));
        }

        self.push_free(block, class);
        ctrl.allocated_bytes
            .fetch_sub(class_block_size(class) as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Translate an arena pointer into an address in this process.
    pub fn resolve(&self, ptr: ArenaPtr) -> SpatResult<NonNull<u8>> {
        if ptr.is_null() {
            return Err(SpatError::invariant("dereference of a null arena pointer"));
        }

        let segment = ptr.segment();
        let offset = ptr.offset() as usize;

        {
            let segments = self.segments.read();
            if let Some(Some(region)) = segments.get(segment) {
                return Self::address_in(region, ptr, offset);
            }
        }

        let mut segments = self.segments.write();
        if segments.len() <= segment {
            segments.resize_with(segment + 1, || None);
        }
        if segments[segment].is_none() {
            segments[segment] = Some(self.open_segment(segment)?);
        }
        match &segments[segment] {
            Some(region) => Self::address_in(region, ptr, offset),
            None => Err(SpatError::invariant(format!("segment {} not mapped", segment))),
        }
    }

    /// Resolve as a typed pointer.
    pub(crate) fn resolve_as<T>(&self, ptr: ArenaPtr) -> SpatResult<NonNull<T>> {
        Ok(self.resolve(ptr)?.cast::<T>())
    }

    /// Unlink every segment object of this arena. Local mappings stay valid.
    pub fn unlink_segments(&self) -> SpatResult<usize> {
        let count = self.ctrl().segment_count.load(Ordering::Acquire) as usize;
        let mut removed = 0;
        for index in 0..count {
            if SharedMemoryRegion::unlink(&self.namespace.segment_object(self.handle.0, index))? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn address_in(
        region: &SharedMemoryRegion,
        ptr: ArenaPtr,
        offset: usize,
    ) -> SpatResult<NonNull<u8>> {
        if offset >= region.size() {
            return Err(SpatError::invariant(format!(
                "arena pointer {} beyond segment size {}",
                ptr,
                region.size()
            )));
        }
        // SAFETY: offset is within the mapping.
        let addr = unsafe { region.as_ptr().add(offset) };
        NonNull::new(addr).ok_or_else(|| SpatError::invariant("resolved to null"))
    }

    fn open_segment(&self, index: usize) -> SpatResult<SharedMemoryRegion> {
        let ctrl = self.ctrl();
        let count = ctrl.segment_count.load(Ordering::Acquire) as usize;
        if index >= count {
            return Err(SpatError::invariant(format!(
                "pointer into segment {} but arena has {} segments",
                index, count
            )));
        }
        let size = ctrl.segment_sizes[index].load(Ordering::Relaxed) as usize;
        let region =
            SharedMemoryRegion::open(&self.namespace.segment_object(self.handle.0, index), size)?;
        tracing::debug!(handle = %self.handle, segment = index, size = size, "Mapped arena segment");
        Ok(region)
    }

    fn block_header(&self, block: ArenaPtr) -> SpatResult<&BlockHeader> {
        let addr = self.resolve_as::<BlockHeader>(block)?;
        // SAFETY: block headers are 16-aligned and stay mapped while self lives.
        Ok(unsafe { &*addr.as_ptr() })
    }

    /// Caller holds the arena mutex.
    fn push_free(&self, block: ArenaPtr, class: usize) {
        let ctrl = self.ctrl();
        if let Ok(header) = self.block_header(block) {
            header.magic.store(BLOCK_FREE, Ordering::Relaxed);
            header.class.store(class as u32, Ordering::Relaxed);
            header
                .next_free
                .store(ctrl.free_lists[class].load(Ordering::Relaxed), Ordering::Relaxed);
            ctrl.free_lists[class].store(block.as_u64(), Ordering::Relaxed);
        }
    }

    /// Carve a block from the newest segment, growing the arena if needed.
    fn bump(
        &self,
        _guard: &ShmMutexGuard<'_>,
        block_size: u64,
        requested: usize,
    ) -> SpatResult<ArenaPtr> {
        let ctrl = self.ctrl();
        let last = ctrl.segment_count.load(Ordering::Acquire) as usize - 1;
        let used = ctrl.segment_used[last].load(Ordering::Relaxed);
        let size = ctrl.segment_sizes[last].load(Ordering::Relaxed);

        if used + block_size <= size {
            ctrl.segment_used[last].store(used + block_size, Ordering::Relaxed);
            return Ok(ArenaPtr::new(last, used));
        }

        let index = last + 1;
        if index >= MAX_SEGMENTS {
            return Err(SpatError::OutOfMemory { requested });
        }

        let total = ctrl.total_bytes.load(Ordering::Relaxed);
        let Some(segment_size) = next_segment_size(
            ctrl.initial_segment_size.load(Ordering::Relaxed),
            index,
            block_size,
            ctrl.max_total_bytes.load(Ordering::Relaxed).saturating_sub(total),
        ) else {
            tracing::debug!(
                handle = %self.handle,
                total_bytes = total,
                block_size = block_size,
                "Arena reached its size limit"
            );
            return Err(SpatError::OutOfMemory { requested });
        };

        let region = SharedMemoryRegion::create(
            &self.namespace.segment_object(self.handle.0, index),
            segment_size as usize,
        )?;

        // Whatever is left in the old segment goes onto the free lists.
        self.retire_tail(last, used, size);

        ctrl.segment_sizes[index].store(segment_size, Ordering::Relaxed);
        ctrl.segment_used[index].store(SEGMENT_DATA_START + block_size, Ordering::Relaxed);
        ctrl.total_bytes.fetch_add(segment_size, Ordering::Relaxed);
        ctrl.segment_count
            .store(index as u32 + 1, Ordering::Release);

        {
            let mut segments = self.segments.write();
            if segments.len() <= index {
                segments.resize_with(index + 1, || None);
            }
            segments[index] = Some(region);
        }

        tracing::debug!(
            handle = %self.handle,
            segment = index,
            size = segment_size,
            "Grew arena"
        );

        Ok(ArenaPtr::new(index, SEGMENT_DATA_START))
    }

    fn retire_tail(&self, segment: usize, mut used: u64, size: u64) {
        let ctrl = self.ctrl();
        let min_block = class_block_size(0) as u64;
        while size - used >= min_block {
            let remaining = size - used;
            let class = (0..NUM_CLASSES)
                .rev()
                .find(|&c| class_block_size(c) as u64 <= remaining)
                .unwrap_or(0);
            self.push_free(ArenaPtr::new(segment, used), class);
            used += class_block_size(class) as u64;
        }
        ctrl.segment_used[segment].store(used, Ordering::Relaxed);
    }
}

/// Size of segment `index` for a block of `block_size`, given the bytes
/// left in the arena budget. `None` if no segment can hold the block.
///
/// Segments double up to `initial << MAX_GROWTH_SHIFT`, never exceed
/// [`SharedMemoryRegion::MAX_SIZE`] and shrink to fit the remaining budget.
fn next_segment_size(initial: u64, index: usize, block_size: u64, budget: u64) -> Option<u64> {
    let page = PAGE_SIZE as u64;
    let needed = (SEGMENT_DATA_START + block_size).next_multiple_of(page);
    let limit = (SharedMemoryRegion::MAX_SIZE as u64).min(budget / page * page);
    if needed > limit {
        return None;
    }
    let grown = initial.saturating_mul(1 << index.min(MAX_GROWTH_SHIFT));
    Some(grown.clamp(needed, limit))
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("handle", &self.handle)
            .field("stats", &self.stats())
            .finish()
    }
}
