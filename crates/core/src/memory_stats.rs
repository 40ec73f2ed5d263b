//! Cross-thread heap statistics registry
//!
//! Gives the report and SIGQUIT diagnostics visibility into every worker
//! thread's heap without touching the allocation fast path with contention.
//! Each thread's heap claims an exclusive slot and publishes its counters
//! with plain relaxed stores; readers only iterate during diagnostics.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │               RuntimeStatsRegistry (global)             │
//! ├─────────────────────────────────────────────────────────┤
//! │ slots: [HeapSlot; MAX_THREADS]     retired: totals of   │
//! │                                    torn-down threads    │
//! │  ┌──────────────────┐  ┌──────────────────┐             │
//! │  │ Slot 0 (Thread A)│  │ Slot 1 (Thread B)│  ...        │
//! │  │ thread_id        │  │ thread_id        │             │
//! │  │ blocks/bytes/... │  │ blocks/bytes/... │             │
//! │  └──────────────────┘  └──────────────────┘             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Registration**: one CAS, at context creation.
//! - **Publish**: a handful of relaxed stores, single writer per slot.
//! - **Release**: at context teardown the slot's totals fold into `retired`
//!   and the slot frees up, so thread churn never exhausts the registry.
//! - Threads beyond capacity are counted in `overflow_count`, not an error.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of worker threads tracked at once.
const MAX_THREADS: usize = 64;

/// A thread-heap's live counter snapshot, owned plain by the heap and
/// published into its slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapCounters {
    pub blocks_allocated: u64,
    pub blocks_freed: u64,
    pub bytes_allocated: u64,
    pub live_blocks: u64,
    pub peak_live_blocks: u64,
    pub orphan_reuses: u64,
}

/// One thread's published statistics.
#[derive(Debug)]
pub struct HeapSlot {
    /// Thread ID (0 = slot is free).
    pub thread_id: AtomicU64,
    pub blocks_allocated: AtomicU64,
    pub blocks_freed: AtomicU64,
    pub bytes_allocated: AtomicU64,
    pub live_blocks: AtomicU64,
    pub peak_live_blocks: AtomicU64,
    pub orphan_reuses: AtomicU64,
}

impl HeapSlot {
    const fn new() -> Self {
        Self {
            thread_id: AtomicU64::new(0),
            blocks_allocated: AtomicU64::new(0),
            blocks_freed: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            live_blocks: AtomicU64::new(0),
            peak_live_blocks: AtomicU64::new(0),
            orphan_reuses: AtomicU64::new(0),
        }
    }
}

/// Totals carried over from released slots.
#[derive(Debug)]
struct RetiredTotals {
    threads: AtomicU64,
    blocks_allocated: AtomicU64,
    blocks_freed: AtomicU64,
    bytes_allocated: AtomicU64,
    orphan_reuses: AtomicU64,
}

/// Global registry for cross-thread heap statistics.
pub struct RuntimeStatsRegistry {
    slots: Box<[HeapSlot]>,
    retired: RetiredTotals,
    /// Count of threads that couldn't get a slot.
    pub overflow_count: AtomicU64,
}

impl RuntimeStatsRegistry {
    fn new(capacity: usize) -> Self {
        let slots: Vec<HeapSlot> = (0..capacity).map(|_| HeapSlot::new()).collect();
        Self {
            slots: slots.into_boxed_slice(),
            retired: RetiredTotals {
                threads: AtomicU64::new(0),
                blocks_allocated: AtomicU64::new(0),
                blocks_freed: AtomicU64::new(0),
                bytes_allocated: AtomicU64::new(0),
                orphan_reuses: AtomicU64::new(0),
            },
            overflow_count: AtomicU64::new(0),
        }
    }

    /// Claim a slot for the calling thread (CAS from 0 to its thread id).
    ///
    /// Returns the slot index, or None when the registry is full; the
    /// thread then runs untracked and `overflow_count` records it.
    pub fn register(&self) -> Option<usize> {
        let thread_id = current_thread_id();

        for (idx, slot) in self.slots.iter().enumerate() {
            if slot
                .thread_id
                .compare_exchange(0, thread_id, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(idx);
            }
        }

        self.overflow_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Publish a counter snapshot into a slot.
    ///
    /// The claiming thread is the only writer, so plain relaxed stores are
    /// enough; the peak needs no CAS loop either.
    #[inline]
    pub fn publish(&self, slot_idx: usize, c: &HeapCounters) {
        if let Some(slot) = self.slots.get(slot_idx) {
            slot.blocks_allocated.store(c.blocks_allocated, Ordering::Relaxed);
            slot.blocks_freed.store(c.blocks_freed, Ordering::Relaxed);
            slot.bytes_allocated.store(c.bytes_allocated, Ordering::Relaxed);
            slot.live_blocks.store(c.live_blocks, Ordering::Relaxed);
            slot.peak_live_blocks.store(c.peak_live_blocks, Ordering::Relaxed);
            slot.orphan_reuses.store(c.orphan_reuses, Ordering::Relaxed);
        }
    }

    /// Release a slot at thread teardown: fold its totals into `retired`
    /// and free the slot for the next thread.
    pub fn release(&self, slot_idx: usize, c: &HeapCounters) {
        if let Some(slot) = self.slots.get(slot_idx) {
            self.retired.threads.fetch_add(1, Ordering::Relaxed);
            self.retired.blocks_allocated.fetch_add(c.blocks_allocated, Ordering::Relaxed);
            self.retired.blocks_freed.fetch_add(c.blocks_freed, Ordering::Relaxed);
            self.retired.bytes_allocated.fetch_add(c.bytes_allocated, Ordering::Relaxed);
            self.retired.orphan_reuses.fetch_add(c.orphan_reuses, Ordering::Relaxed);

            slot.blocks_allocated.store(0, Ordering::Relaxed);
            slot.blocks_freed.store(0, Ordering::Relaxed);
            slot.bytes_allocated.store(0, Ordering::Relaxed);
            slot.live_blocks.store(0, Ordering::Relaxed);
            slot.peak_live_blocks.store(0, Ordering::Relaxed);
            slot.orphan_reuses.store(0, Ordering::Relaxed);
            // Freeing the slot last so readers never see a half-cleared claim.
            slot.thread_id.store(0, Ordering::Release);
        }
    }

    /// Aggregate statistics across live slots and retired threads.
    pub fn aggregate_stats(&self) -> AggregateRuntimeStats {
        let mut stats = AggregateRuntimeStats {
            active_threads: 0,
            retired_threads: self.retired.threads.load(Ordering::Relaxed),
            total_blocks_allocated: self.retired.blocks_allocated.load(Ordering::Relaxed),
            total_blocks_freed: self.retired.blocks_freed.load(Ordering::Relaxed),
            total_bytes_allocated: self.retired.bytes_allocated.load(Ordering::Relaxed),
            total_orphan_reuses: self.retired.orphan_reuses.load(Ordering::Relaxed),
            live_blocks: 0,
            peak_live_blocks: 0,
            overflow_count: self.overflow_count.load(Ordering::Relaxed),
        };

        for slot in self.slots.iter() {
            let thread_id = slot.thread_id.load(Ordering::Acquire);
            if thread_id > 0 {
                stats.active_threads += 1;
                stats.total_blocks_allocated += slot.blocks_allocated.load(Ordering::Relaxed);
                stats.total_blocks_freed += slot.blocks_freed.load(Ordering::Relaxed);
                stats.total_bytes_allocated += slot.bytes_allocated.load(Ordering::Relaxed);
                stats.total_orphan_reuses += slot.orphan_reuses.load(Ordering::Relaxed);
                stats.live_blocks += slot.live_blocks.load(Ordering::Relaxed);
                stats.peak_live_blocks += slot.peak_live_blocks.load(Ordering::Relaxed);
            }
        }

        stats
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Aggregated heap statistics across all threads.
#[derive(Debug, Clone, Copy)]
pub struct AggregateRuntimeStats {
    pub active_threads: usize,
    pub retired_threads: u64,
    pub total_blocks_allocated: u64,
    pub total_blocks_freed: u64,
    pub total_bytes_allocated: u64,
    pub total_orphan_reuses: u64,
    pub live_blocks: u64,
    pub peak_live_blocks: u64,
    pub overflow_count: u64,
}

/// Global counter for generating unique thread IDs.
/// Starts at 1 because 0 means "empty slot".
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THIS_THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Unique ID for the current thread: a global atomic counter, so no hash
/// collisions. Also stored as the context's thread id.
pub fn current_thread_id() -> u64 {
    THIS_THREAD_ID.with(|&id| id)
}

// Global registry instance
static RUNTIME_REGISTRY: OnceLock<RuntimeStatsRegistry> = OnceLock::new();

/// Get the global runtime stats registry.
pub fn runtime_registry() -> &'static RuntimeStatsRegistry {
    RUNTIME_REGISTRY.get_or_init(|| RuntimeStatsRegistry::new(MAX_THREADS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_publish_aggregate() {
        let registry = RuntimeStatsRegistry::new(4);

        let idx = registry.register().expect("slot available");
        let counters = HeapCounters {
            blocks_allocated: 10,
            blocks_freed: 4,
            bytes_allocated: 320,
            live_blocks: 6,
            peak_live_blocks: 8,
            orphan_reuses: 2,
        };
        registry.publish(idx, &counters);

        let stats = registry.aggregate_stats();
        assert_eq!(stats.active_threads, 1);
        assert_eq!(stats.total_blocks_allocated, 10);
        assert_eq!(stats.total_blocks_freed, 4);
        assert_eq!(stats.live_blocks, 6);
        assert_eq!(stats.peak_live_blocks, 8);
        assert_eq!(stats.total_orphan_reuses, 2);
    }

    #[test]
    fn test_release_folds_into_retired() {
        let registry = RuntimeStatsRegistry::new(2);

        let idx = registry.register().expect("slot available");
        let counters = HeapCounters {
            blocks_allocated: 7,
            blocks_freed: 7,
            bytes_allocated: 100,
            live_blocks: 0,
            peak_live_blocks: 3,
            orphan_reuses: 1,
        };
        registry.publish(idx, &counters);
        registry.release(idx, &counters);

        let stats = registry.aggregate_stats();
        assert_eq!(stats.active_threads, 0);
        assert_eq!(stats.retired_threads, 1);
        assert_eq!(stats.total_blocks_allocated, 7);
        assert_eq!(stats.total_bytes_allocated, 100);
        assert_eq!(stats.live_blocks, 0);

        // The slot is claimable again.
        assert!(registry.register().is_some());
    }

    #[test]
    fn test_overflow_counts_instead_of_failing() {
        let registry = RuntimeStatsRegistry::new(1);
        assert!(registry.register().is_some());
        // Same thread id can't CAS into the one taken slot again from another
        // claim, so this models the registry-full path.
        assert!(registry.register().is_none());
        assert_eq!(registry.overflow_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_thread_ids_are_unique() {
        use std::collections::HashSet;
        use std::sync::{Arc, Mutex};
        use std::thread;

        let ids = Arc::new(Mutex::new(HashSet::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || {
                    ids.lock().unwrap().insert(current_thread_id());
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ids.lock().unwrap().len(), 8, "thread IDs should be unique");
    }

    #[test]
    fn test_concurrent_registration() {
        use std::thread;

        let registry: &'static RuntimeStatsRegistry =
            Box::leak(Box::new(RuntimeStatsRegistry::new(8)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                thread::spawn(move || {
                    let idx = registry.register()?;
                    registry.publish(
                        idx,
                        &HeapCounters {
                            blocks_allocated: i + 1,
                            ..HeapCounters::default()
                        },
                    );
                    Some(idx)
                })
            })
            .collect();

        let mut claimed: Vec<usize> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        claimed.sort_unstable();
        claimed.dedup();
        assert_eq!(claimed.len(), 8, "every thread claims a distinct slot");

        let stats = registry.aggregate_stats();
        // 1 + 2 + ... + 8
        assert_eq!(stats.total_blocks_allocated, 36);
    }
}
