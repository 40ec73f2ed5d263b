//! Evidence vector
//!
//! The handlers in scope at any point form a logical stack, the *evidence
//! vector*. Each entry pairs a handler's marker with its handler state. The
//! physical shape tracks the count to keep the common case allocation-free:
//!
//! ```text
//!   no handlers    -> the pinned empty vector
//!   one handler    -> the evidence block itself
//!   two or more    -> a vector of evidence blocks, innermost last
//! ```
//!
//! Updates are functional: push and pop build a fresh vector rather than
//! mutating, because a captured continuation may still hold the old one.
//! `evv_get`/`evv_set` snapshot and restore the whole value around
//! continuation invocations.

use tern_core::{BoxVal, Tag, fatal_error};

use crate::block::{Block, size_of_block};
use crate::context::Context;
use crate::refcount::{drop_block, dup_block, dup_boxed};
use crate::vector::{vector_alloc, vector_buf, vector_empty, vector_len};

/// Allocate an evidence entry for a handler.
pub unsafe fn evidence_alloc(ctx: &mut Context, marker: i32, hstate: BoxVal) -> *mut Block {
    let ev = Block::alloc(&mut ctx.heap, size_of_block(2, 0), 2, Tag::EVIDENCE);
    unsafe {
        Block::set_field(ev, 0, BoxVal::from_int(marker as i64));
        Block::set_field(ev, 1, hstate);
    }
    ev
}

/// The marker this evidence belongs to.
///
/// # Safety
/// `ev` must be a live evidence block.
#[inline]
pub unsafe fn evidence_marker(ev: *mut Block) -> i32 {
    debug_assert_eq!(unsafe { (*ev).header().tag() }, Tag::EVIDENCE, "evidence_marker: not an evidence block");
    unsafe { Block::field(ev, 0) }.as_int() as i32
}

/// The handler state, with an owner added.
///
/// # Safety
/// `ev` must be a live evidence block.
#[inline]
pub unsafe fn evidence_hstate(ev: *mut Block) -> BoxVal {
    debug_assert_eq!(unsafe { (*ev).header().tag() }, Tag::EVIDENCE, "evidence_hstate: not an evidence block");
    unsafe { dup_boxed(Block::field(ev, 1)) }
}

/// Number of handlers in scope.
pub unsafe fn evv_count(ctx: &mut Context) -> usize {
    let b = ctx.evv.as_ptr() as *mut Block;
    if unsafe { (*b).header().tag() } == Tag::EVIDENCE {
        1
    } else {
        unsafe { vector_len(b) }
    }
}

/// Snapshot the whole evidence value, adding an owner. Restored later with
/// `evv_set` around a continuation invocation.
pub unsafe fn evv_get(ctx: &mut Context) -> BoxVal {
    unsafe { dup_boxed(ctx.evv) }
}

/// Replace the evidence value, dropping the previous one. Takes ownership
/// of `v`.
///
/// # Safety
/// `v` must be an owned evidence block or vector of evidence blocks.
pub unsafe fn evv_set(ctx: &mut Context, v: BoxVal) {
    debug_assert!(v.is_ptr(), "evv_set: evidence value must be a block");
    let old = std::mem::replace(&mut ctx.evv, v);
    unsafe { drop_block(old.as_ptr() as *mut Block, ctx) };
}

/// Evidence entry `i`, outermost first, with an owner added.
pub unsafe fn evv_at(ctx: &mut Context, i: usize) -> BoxVal {
    let b = ctx.evv.as_ptr() as *mut Block;
    if unsafe { (*b).header().tag() } == Tag::EVIDENCE {
        debug_assert_eq!(i, 0, "evv_at: index {} with a single handler", i);
        unsafe { dup_boxed(ctx.evv) }
    } else {
        debug_assert!(i < unsafe { vector_len(b) }, "evv_at: index {} out of range", i);
        unsafe { dup_boxed(vector_buf(b).add(i).read()) }
    }
}

/// Find the evidence for `marker`, searching innermost handlers first.
/// Missing evidence means a handler frame exited while its operations were
/// still assumed installed, which is unrecoverable.
pub unsafe fn evv_lookup(ctx: &mut Context, marker: i32) -> BoxVal {
    let b = ctx.evv.as_ptr() as *mut Block;
    if unsafe { (*b).header().tag() } == Tag::EVIDENCE {
        if unsafe { evidence_marker(b) } == marker {
            return unsafe { dup_boxed(ctx.evv) };
        }
    } else {
        let n = unsafe { vector_len(b) };
        let buf = unsafe { vector_buf(b) };
        for i in (0..n).rev() {
            let ev = unsafe { buf.add(i).read() };
            if unsafe { evidence_marker(ev.as_ptr() as *mut Block) } == marker {
                return unsafe { dup_boxed(ev) };
            }
        }
    }
    fatal_error!(libc::EFAULT, "no evidence for effect marker {}", marker);
}

/// Push evidence for a newly entered handler frame. Takes ownership of
/// `ev`.
pub unsafe fn evv_push(ctx: &mut Context, ev: *mut Block) {
    let cur = ctx.evv;
    let cur_b = cur.as_ptr() as *mut Block;
    if unsafe { (*cur_b).header().tag() } == Tag::EVIDENCE {
        // one handler becomes two: switch to the vector shape
        let v = unsafe { vector_alloc(ctx, 2, BoxVal::NULL) };
        unsafe {
            let buf = vector_buf(v);
            buf.write(cur);
            buf.add(1).write(BoxVal::from_ptr(ev as *mut u8));
        }
        ctx.evv = BoxVal::from_ptr(v as *mut u8);
    } else {
        let n = unsafe { vector_len(cur_b) };
        if n == 0 {
            unsafe { drop_block(cur_b, ctx) };
            ctx.evv = BoxVal::from_ptr(ev as *mut u8);
        } else {
            let v = unsafe { vector_alloc(ctx, n + 1, BoxVal::NULL) };
            unsafe {
                let src = vector_buf(cur_b);
                let dst = vector_buf(v);
                for i in 0..n {
                    dst.add(i).write(dup_boxed(src.add(i).read()));
                }
                dst.add(n).write(BoxVal::from_ptr(ev as *mut u8));
                drop_block(cur_b, ctx);
            }
            ctx.evv = BoxVal::from_ptr(v as *mut u8);
        }
    }
}

/// Pop the innermost handler's evidence on frame exit.
pub unsafe fn evv_pop(ctx: &mut Context) {
    let cur = ctx.evv;
    let cur_b = cur.as_ptr() as *mut Block;
    if unsafe { (*cur_b).header().tag() } == Tag::EVIDENCE {
        ctx.evv = BoxVal::from_ptr(unsafe { dup_block(vector_empty()) } as *mut u8);
        unsafe { drop_block(cur_b, ctx) };
        return;
    }
    let n = unsafe { vector_len(cur_b) };
    match n {
        0 => fatal_error!(libc::EFAULT, "handler exit with no handler in scope"),
        2 => {
            // back to the single shape
            let keep = unsafe { dup_boxed(vector_buf(cur_b).read()) };
            unsafe { drop_block(cur_b, ctx) };
            ctx.evv = keep;
        }
        _ => {
            let v = unsafe { vector_alloc(ctx, n - 1, BoxVal::NULL) };
            unsafe {
                let src = vector_buf(cur_b);
                let dst = vector_buf(v);
                for i in 0..n - 1 {
                    dst.add(i).write(dup_boxed(src.add(i).read()));
                }
                drop_block(cur_b, ctx);
            }
            ctx.evv = BoxVal::from_ptr(v as *mut u8);
        }
    }
}

/// Enter a handler frame: mint a marker, push evidence carrying `hstate`,
/// and return the marker for the frame to match yields against.
pub unsafe fn handler_install(ctx: &mut Context, hstate: BoxVal) -> i32 {
    let marker = ctx.next_marker();
    let ev = unsafe { evidence_alloc(ctx, marker, hstate) };
    unsafe { evv_push(ctx, ev) };
    marker
}

/// Leave a handler frame, popping its evidence.
pub unsafe fn handler_uninstall(ctx: &mut Context) {
    unsafe { evv_pop(ctx) };
}

/// Enter a handler frame and return its fresh marker.
///
/// # Safety
/// `ctx` must be the calling thread's context; `hstate` must be owned by
/// the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_handler_install(hstate: BoxVal, ctx: *mut Context) -> i32 {
    unsafe { handler_install(&mut *ctx, hstate) }
}

/// Leave the innermost handler frame.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_handler_uninstall(ctx: *mut Context) {
    unsafe { handler_uninstall(&mut *ctx) }
}

/// Number of handlers in scope.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_evv_count(ctx: *mut Context) -> usize {
    unsafe { evv_count(&mut *ctx) }
}

/// Snapshot the evidence value, adding an owner.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_evv_get(ctx: *mut Context) -> BoxVal {
    unsafe { evv_get(&mut *ctx) }
}

/// Replace the evidence value, dropping the previous one.
///
/// # Safety
/// `ctx` must be the calling thread's context; `v` must be an owned
/// evidence value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_evv_set(v: BoxVal, ctx: *mut Context) {
    unsafe { evv_set(&mut *ctx, v) }
}

/// Evidence entry `i`, outermost first, with an owner added.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_evv_at(i: usize, ctx: *mut Context) -> BoxVal {
    unsafe { evv_at(&mut *ctx, i) }
}

/// The evidence for `marker`; fatal if no such handler is in scope.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_evv_lookup(marker: i32, ctx: *mut Context) -> BoxVal {
    unsafe { evv_lookup(&mut *ctx, marker) }
}

/// The marker of a boxed evidence entry.
///
/// # Safety
/// `ev` must box a live evidence block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_evidence_marker(ev: BoxVal) -> i32 {
    unsafe { evidence_marker(ev.as_ptr() as *mut Block) }
}

/// The handler state of a boxed evidence entry, with an owner added.
///
/// # Safety
/// `ev` must box a live evidence block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_evidence_hstate(ev: BoxVal) -> BoxVal {
    unsafe { evidence_hstate(ev.as_ptr() as *mut Block) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refcount::drop_boxed;

    #[test]
    fn test_single_handler_needs_only_the_evidence_block() {
        let mut ctx = Context::new();
        unsafe {
            assert_eq!(evv_count(&mut ctx), 0);
            let m = handler_install(&mut ctx, BoxVal::from_int(10));
            assert_eq!(evv_count(&mut ctx), 1);
            // just the evidence block itself, no vector
            assert_eq!(ctx.heap.counters().blocks_allocated, 1);
            assert_eq!((*(ctx.evv.as_ptr() as *mut Block)).header().tag(), Tag::EVIDENCE);

            let ev = evv_lookup(&mut ctx, m);
            assert_eq!(evidence_marker(ev.as_ptr() as *mut Block), m);
            assert_eq!(evidence_hstate(ev.as_ptr() as *mut Block).as_int(), 10);
            drop_boxed(ev, &mut ctx);

            handler_uninstall(&mut ctx);
            assert_eq!(evv_count(&mut ctx), 0);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_second_handler_switches_to_the_vector_shape() {
        let mut ctx = Context::new();
        unsafe {
            let m1 = handler_install(&mut ctx, BoxVal::from_int(1));
            let m2 = handler_install(&mut ctx, BoxVal::from_int(2));
            let m3 = handler_install(&mut ctx, BoxVal::from_int(3));
            assert_eq!(evv_count(&mut ctx), 3);
            let evv_b = ctx.evv.as_ptr() as *mut Block;
            assert_eq!((*evv_b).header().tag(), Tag::VECTOR_SMALL);

            // outermost first
            let first = evv_at(&mut ctx, 0);
            assert_eq!(evidence_marker(first.as_ptr() as *mut Block), m1);
            drop_boxed(first, &mut ctx);
            let last = evv_at(&mut ctx, 2);
            assert_eq!(evidence_marker(last.as_ptr() as *mut Block), m3);
            drop_boxed(last, &mut ctx);

            let ev = evv_lookup(&mut ctx, m2);
            assert_eq!(evidence_hstate(ev.as_ptr() as *mut Block).as_int(), 2);
            drop_boxed(ev, &mut ctx);

            handler_uninstall(&mut ctx);
            handler_uninstall(&mut ctx);
            assert_eq!(evv_count(&mut ctx), 1);
            handler_uninstall(&mut ctx);
            assert_eq!(evv_count(&mut ctx), 0);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_lookup_prefers_the_innermost_handler() {
        let mut ctx = Context::new();
        unsafe {
            // same state value, distinct markers
            let outer = handler_install(&mut ctx, BoxVal::from_int(7));
            let inner = handler_install(&mut ctx, BoxVal::from_int(8));
            assert_ne!(outer, inner);

            let ev = evv_lookup(&mut ctx, inner);
            assert_eq!(evidence_marker(ev.as_ptr() as *mut Block), inner);
            drop_boxed(ev, &mut ctx);
            let ev = evv_lookup(&mut ctx, outer);
            assert_eq!(evidence_marker(ev.as_ptr() as *mut Block), outer);
            drop_boxed(ev, &mut ctx);

            handler_uninstall(&mut ctx);
            handler_uninstall(&mut ctx);
        }
    }

    #[test]
    fn test_snapshot_and_restore_around_a_capture() {
        let mut ctx = Context::new();
        unsafe {
            handler_install(&mut ctx, BoxVal::from_int(1));
            let snapshot = evv_get(&mut ctx);

            handler_install(&mut ctx, BoxVal::from_int(2));
            assert_eq!(evv_count(&mut ctx), 2);

            // restore the captured view; the two-entry vector drops
            evv_set(&mut ctx, snapshot);
            assert_eq!(evv_count(&mut ctx), 1);

            handler_uninstall(&mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_handler_state_is_owned_by_its_evidence() {
        let mut ctx = Context::new();
        unsafe {
            let hstate = Block::alloc(&mut ctx.heap, crate::block::size_of_block(0, 0), 0, Tag(51));
            handler_install(&mut ctx, BoxVal::from_ptr(hstate as *mut u8));
            assert_eq!(ctx.heap.counters().live_blocks, 2, "state block plus its evidence");
            handler_uninstall(&mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0, "state dropped with its evidence");
        }
    }
}
