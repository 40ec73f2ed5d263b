//! Reference-count lifecycle
//!
//! Generated code calls `dup` when a reference is copied and `drop` when one
//! goes away. The count lives in the block header as a `u32` read through a
//! signed lens:
//!
//! ```text
//!   stored value               meaning                    dup / drop
//!   0                          unique (one owner)         plain store
//!   1 .. 0x7FFF_FFFE           shared, owners - 1         plain store
//!   0x8000_0000 .. 0xBFFF...   thread shared              atomic RMW
//!   0xC000_0000 ..             sticky (pinned, leaked)    no-op
//! ```
//!
//! Reading the count as `i32` makes one sign test pick the path: negative
//! means the slow (atomic or pinned) cases, everything else is a plain
//! non-atomic load/store pair. Thread-shared blocks use `fetch_add`/
//! `fetch_sub`, with an acquire fence before the freeing thread walks the
//! fields so it observes every other owner's writes.
//!
//! Freeing recurses through scan fields. Past the configured cascade depth
//! the remaining block is parked on the context's deferred list instead,
//! fields intact, and reclaimed at the next drain point (yield resolution or
//! context teardown). Raw-tagged blocks never recurse; their foreign
//! free-function runs exactly once, right before the storage goes back.

use std::sync::atomic::{Ordering, fence};

use tern_core::{BoxVal, RC_SHARED, RC_STICKY};

use crate::block::Block;
use crate::context::Context;

/// Signature of the free function carried by raw-tagged blocks.
pub type RawFreeFun = unsafe extern "C" fn(*mut u8);

/// Add one owner to a block. Returns the same pointer for call chaining.
///
/// # Safety
/// `b` must point to a live block.
#[inline]
pub unsafe fn dup_block(b: *mut Block) -> *mut Block {
    let rc = unsafe { (*b).header().load_refcount() };
    if (rc as i32) < 0 {
        unsafe { dup_check(b) }
    } else {
        unsafe { (*b).header().refcount().store(rc + 1, Ordering::Relaxed) };
        b
    }
}

#[cold]
unsafe fn dup_check(b: *mut Block) -> *mut Block {
    let rc = unsafe { (*b).header().load_refcount() };
    if rc < RC_STICKY {
        // thread shared: contended increment. A count that climbs into the
        // sticky band stays there; later dups see it and stop counting.
        unsafe { (*b).header().refcount().fetch_add(1, Ordering::Relaxed) };
    }
    b
}

/// Remove one owner; frees the block when the last owner leaves.
///
/// # Safety
/// `b` must point to a live block owned by the caller.
#[inline]
pub unsafe fn drop_block(b: *mut Block, ctx: &mut Context) {
    unsafe { drop_block_at(b, ctx, 0) }
}

#[inline]
unsafe fn drop_block_at(b: *mut Block, ctx: &mut Context, depth: usize) {
    let rc = unsafe { (*b).header().load_refcount() };
    if (rc as i32) <= 0 {
        unsafe { drop_check(b, ctx, depth) }
    } else {
        unsafe { (*b).header().refcount().store(rc - 1, Ordering::Relaxed) };
    }
}

#[cold]
unsafe fn drop_check(b: *mut Block, ctx: &mut Context, depth: usize) {
    let rc = unsafe { (*b).header().load_refcount() };
    if rc == 0 {
        // unique: the last owner just left
        unsafe { free_block_at(b, ctx, depth) };
    } else if rc < RC_STICKY {
        // thread shared: release our writes, and acquire everyone else's
        // before walking the fields if we turn out to be last.
        let old = unsafe { (*b).header().refcount().fetch_sub(1, Ordering::Release) };
        if old == RC_SHARED {
            fence(Ordering::Acquire);
            unsafe { free_block_at(b, ctx, depth) };
        }
    }
    // sticky: pinned, never freed
}

/// Free a dead block: run the raw free-function or drop the scan fields,
/// then return the storage. Blocks whose field cascade would exceed the
/// context's depth limit are parked on the deferred list instead.
unsafe fn free_block_at(b: *mut Block, ctx: &mut Context, depth: usize) {
    let tag = unsafe { (*b).header().tag() };
    if tag.is_raw() {
        // words: [free function, foreign pointer]; no scan fields
        let free_fun = unsafe { Block::words(b).read() };
        let data = unsafe { Block::words(b).add(1).read() };
        if !free_fun.is_null() {
            let f: RawFreeFun = unsafe { std::mem::transmute(free_fun.as_cptr()) };
            unsafe { f(data.as_cptr()) };
        }
    } else {
        let scan = unsafe { Block::scan_count(b) };
        if scan > 0 {
            if depth >= ctx.deferred_limit {
                ctx.delayed_free.push(b);
                return;
            }
            let fields = unsafe { Block::fields(b) };
            for i in 0..scan {
                unsafe { drop_boxed_at(fields.add(i).read(), ctx, depth) };
            }
        }
    }
    unsafe { ctx.heap.free_raw(b as *mut u8) };
}

/// Drain the deferred-free list. Each entry restarts with a fresh depth
/// budget, so a parked block's own cascade may park children in turn; the
/// loop runs until the list is empty.
pub unsafe fn drain_deferred(ctx: &mut Context) {
    while let Some(b) = ctx.delayed_free.pop() {
        unsafe { free_block_at(b, ctx, 0) };
    }
}

/// Is the block uniquely owned? True only for a plain count of zero;
/// thread-shared blocks never report unique again.
///
/// # Safety
/// `b` must point to a live block.
#[inline]
pub unsafe fn is_unique(b: *mut Block) -> bool {
    unsafe { (*b).header().is_unique() }
}

/// Promote a block and everything reachable from it for cross-thread use:
/// sets the thread-shared flag and rebases the count into the atomic band.
///
/// The caller must still have exclusive access while marking; the handoff to
/// the other thread needs its own synchronization (the channel or lock that
/// carries the pointer). Already-promoted blocks stop the walk, which also
/// terminates on reference cycles.
///
/// # Safety
/// `b` must point to a live block with no concurrent access during the call.
pub unsafe fn mark_shared(b: *mut Block) {
    let rc = unsafe { (*b).header().load_refcount() };
    if rc >= RC_SHARED {
        return; // already thread shared, or pinned
    }
    unsafe {
        (*b).header_mut().set_thread_shared();
        (*b).header().refcount().store(rc | RC_SHARED, Ordering::Release);
    }
    if unsafe { (*b).header().tag() }.is_raw() {
        return;
    }
    let scan = unsafe { Block::scan_count(b) };
    let fields = unsafe { Block::fields(b) };
    for i in 0..scan {
        let v = unsafe { fields.add(i).read() };
        if v.is_ptr() {
            unsafe { mark_shared(v.as_ptr() as *mut Block) };
        }
    }
}

/// Box-level dup: direct values pass through untouched.
#[inline]
pub unsafe fn dup_boxed(v: BoxVal) -> BoxVal {
    if v.is_ptr() {
        unsafe { dup_block(v.as_ptr() as *mut Block) };
    }
    v
}

/// Box-level drop: direct values pass through untouched.
#[inline]
pub unsafe fn drop_boxed(v: BoxVal, ctx: &mut Context) {
    if v.is_ptr() {
        unsafe { drop_block_at(v.as_ptr() as *mut Block, ctx, 0) };
    }
}

#[inline]
unsafe fn drop_boxed_at(v: BoxVal, ctx: &mut Context, depth: usize) {
    if v.is_ptr() {
        unsafe { drop_block_at(v.as_ptr() as *mut Block, ctx, depth + 1) };
    }
}

/// Add one owner to a boxed value.
///
/// # Safety
/// If `v` is a pointer it must reference a live block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_dup(v: BoxVal) -> BoxVal {
    unsafe { dup_boxed(v) }
}

/// Remove one owner from a boxed value, freeing on last release.
///
/// # Safety
/// `ctx` must be the calling thread's context; if `v` is a pointer it must
/// reference a live block the caller owns.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_drop(v: BoxVal, ctx: *mut Context) {
    unsafe { drop_boxed(v, &mut *ctx) }
}

/// Does the caller hold the only reference? Direct values answer false.
///
/// # Safety
/// If `v` is a pointer it must reference a live block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_is_unique(v: BoxVal) -> bool {
    v.is_ptr() && unsafe { is_unique(v.as_ptr() as *mut Block) }
}

/// Promote a boxed value graph for transfer to another thread.
///
/// # Safety
/// If `v` is a pointer it must reference a live block with no concurrent
/// access during the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_mark_shared(v: BoxVal) {
    if v.is_ptr() {
        unsafe { mark_shared(v.as_ptr() as *mut Block) };
    }
}

/// Reclaim everything parked on the deferred-free list.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_drain_deferred(ctx: *mut Context) {
    unsafe { drain_deferred(&mut *ctx) }
}
