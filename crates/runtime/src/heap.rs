//! Per-thread heap handle
//!
//! Thin wrapper over malloc/realloc/free plus the thread's statistics. Block
//! storage deliberately goes through libc rather than the Rust allocator:
//! orphaned blocks free with a zeroed header, and reallocation happens after
//! the original shape is gone, so deallocation must not need a size or
//! layout. malloc's 16-byte alignment also guarantees the 8-alignment the
//! box encoding relies on.
//!
//! Counters are plain fields owned by the heap's thread and published to the
//! cross-thread registry slot with relaxed stores after each change, so the
//! SIGQUIT dump and the at-exit report see near-current numbers without the
//! fast path taking any contention.

use tern_core::fatal_error;
use tern_core::memory_stats::{HeapCounters, runtime_registry};

/// One worker thread's heap: allocation entry points plus statistics.
pub struct Heap {
    counters: HeapCounters,
    slot: Option<usize>,
}

impl Heap {
    /// Create the heap and claim a statistics slot. A full registry is not
    /// an error; the thread just runs untracked.
    pub fn new() -> Heap {
        Heap {
            counters: HeapCounters::default(),
            slot: runtime_registry().register(),
        }
    }

    /// Allocate `size` bytes of block storage. Never returns null: a failed
    /// allocation is a fatal error (the caller holds no way to recover a
    /// half-built value graph).
    pub(crate) fn alloc_raw(&mut self, size: usize) -> *mut u8 {
        let p = unsafe { libc::malloc(size) } as *mut u8;
        if p.is_null() {
            fatal_error!(libc::ENOMEM, "block allocation of {} bytes failed", size);
        }
        self.counters.blocks_allocated += 1;
        self.counters.bytes_allocated += size as u64;
        self.counters.live_blocks += 1;
        if self.counters.live_blocks > self.counters.peak_live_blocks {
            self.counters.peak_live_blocks = self.counters.live_blocks;
        }
        self.publish();
        p
    }

    /// Grow (or shrink) a uniquely-owned allocation. The pointer may move.
    ///
    /// # Safety
    /// `p` must be a live pointer returned by this allocator.
    pub(crate) unsafe fn realloc_raw(&mut self, p: *mut u8, new_size: usize) -> *mut u8 {
        let q = unsafe { libc::realloc(p as *mut libc::c_void, new_size) } as *mut u8;
        if q.is_null() {
            fatal_error!(libc::ENOMEM, "block reallocation to {} bytes failed", new_size);
        }
        self.counters.bytes_allocated += new_size as u64;
        self.publish();
        q
    }

    /// Return storage to the allocator.
    ///
    /// # Safety
    /// `p` must be a live pointer returned by this allocator, not freed
    /// before, and not used after.
    pub(crate) unsafe fn free_raw(&mut self, p: *mut u8) {
        unsafe { libc::free(p as *mut libc::c_void) };
        self.counters.blocks_freed += 1;
        self.counters.live_blocks = self.counters.live_blocks.saturating_sub(1);
        self.publish();
    }

    /// Record an orphan re-initialized in place of a fresh allocation.
    pub(crate) fn note_orphan_reuse(&mut self) {
        self.counters.orphan_reuses += 1;
        self.publish();
    }

    /// Current counter snapshot.
    pub fn counters(&self) -> &HeapCounters {
        &self.counters
    }

    #[inline]
    fn publish(&self) {
        if let Some(idx) = self.slot {
            runtime_registry().publish(idx, &self.counters);
        }
    }

    /// Release the statistics slot at context teardown; totals fold into the
    /// registry's retired accumulators.
    pub(crate) fn release_slot(&mut self) {
        if let Some(idx) = self.slot.take() {
            runtime_registry().release(idx, &self.counters);
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}
