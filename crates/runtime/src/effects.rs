//! Yielding and continuation capture
//!
//! Performing an effect operation does not search the stack; it switches the
//! context into yield mode and returns. Every intermediate frame on the way
//! back to the handler notices the mode, appends a function value capturing
//! the rest of its own work, and returns early as well:
//!
//! ```text
//!   perform op            frame 3          frame 2          frame 1 (handler)
//!      |                     |                |                |
//!      |  yield_begin        |                |                |
//!      |-------------------->| yield_extend   |                |
//!      |                     |--------------->| yield_extend   |
//!      |                     |                |--------------->| yield_resolve
//!      |                     |                |                |   clause(k)
//!      |                     |                |                |   where k = f2 . f3
//! ```
//!
//! The pending sequence holds at most [`YIELD_CONT_MAX`] entries. On the
//! ninth append the first seven fold into a single composed function value,
//! so arbitrarily deep unwinds cost a bounded amount of context space. The
//! composed value duplicates each segment when invoked, which keeps captured
//! continuations multi-shot.
//!
//! A final yield walks the same frames but resumes nothing: appended
//! continuations are released on the spot and only the clause survives to
//! the root handler.

use std::ptr::null_mut;
use std::sync::atomic::{AtomicU64, Ordering};

use tern_core::BoxVal;

use crate::block::Block;
use crate::context::Context;
use crate::function::{
    function_alloc, function_call, function_dup_field, function_field, function_id,
};
use crate::refcount::{drain_deferred, drop_block, dup_block};

/// Capacity of the pending-continuation sequence.
pub const YIELD_CONT_MAX: usize = 8;

/// Total operation yields across all contexts since process start.
pub static TOTAL_YIELDS: AtomicU64 = AtomicU64::new(0);
/// Total continuation segments folded into composed function values.
pub static TOTAL_CONTS_COMPOSED: AtomicU64 = AtomicU64::new(0);

/// Yield mode of a context. `Final` unwinds without any possibility of
/// resumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldKind {
    None,
    Normal,
    Final,
}

/// In-flight yield: the target handler's marker, the operation clause, and
/// the continuation segments appended so far, innermost first.
pub(crate) struct YieldState {
    pub(crate) marker: i32,
    pub(crate) clause: *mut Block,
    pub(crate) conts: [*mut Block; YIELD_CONT_MAX],
    pub(crate) conts_count: usize,
}

impl Default for YieldState {
    fn default() -> Self {
        YieldState {
            marker: 0,
            clause: null_mut(),
            conts: [null_mut(); YIELD_CONT_MAX],
            conts_count: 0,
        }
    }
}

#[inline]
pub fn yielding(ctx: &Context) -> bool {
    ctx.yielding != YieldKind::None
}

#[inline]
pub fn yielding_non_final(ctx: &Context) -> bool {
    ctx.yielding == YieldKind::Normal
}

#[inline]
pub fn yielding_final(ctx: &Context) -> bool {
    ctx.yielding == YieldKind::Final
}

/// True when the in-flight yield targets `marker`. A frame whose marker does
/// not match keeps unwinding.
#[inline]
pub fn yield_matches(ctx: &Context, marker: i32) -> bool {
    yielding(ctx) && ctx.yield_state.marker == marker
}

/// Start a yield toward the handler identified by `marker`. Takes ownership
/// of `clause`, a unary function value that will receive the composed
/// continuation once the handler frame is reached.
pub unsafe fn yield_begin(ctx: &mut Context, marker: i32, clause: *mut Block) {
    debug_assert_eq!(ctx.yielding, YieldKind::None, "yield_begin: already yielding");
    ctx.yielding = YieldKind::Normal;
    ctx.yield_state.marker = marker;
    ctx.yield_state.clause = clause;
    ctx.yield_state.conts_count = 0;
    TOTAL_YIELDS.fetch_add(1, Ordering::Relaxed);
}

/// Start a non-resumable yield toward the root handler at `marker`. Takes
/// ownership of `clause`.
pub unsafe fn yield_final(ctx: &mut Context, marker: i32, clause: *mut Block) {
    debug_assert_eq!(ctx.yielding, YieldKind::None, "yield_final: already yielding");
    ctx.yielding = YieldKind::Final;
    ctx.yield_state.marker = marker;
    ctx.yield_state.clause = clause;
    ctx.yield_state.conts_count = 0;
    TOTAL_YIELDS.fetch_add(1, Ordering::Relaxed);
}

/// Append a frame's resumption to the pending sequence. Takes ownership of
/// `cont`. During a final unwind nothing can resume, so the value is
/// released instead.
pub unsafe fn yield_extend(ctx: &mut Context, cont: *mut Block) {
    debug_assert_ne!(ctx.yielding, YieldKind::None, "yield_extend: not yielding");
    if ctx.yielding == YieldKind::Final {
        unsafe { drop_block(cont, ctx) };
        return;
    }
    if ctx.yield_state.conts_count == YIELD_CONT_MAX {
        unsafe { overflow_compose(ctx) };
    }
    let i = ctx.yield_state.conts_count;
    ctx.yield_state.conts[i] = cont;
    ctx.yield_state.conts_count = i + 1;
}

/// The handler frame consumes a normal yield: returns the operation clause
/// and the composed continuation, clears the yield state, and releases any
/// frees deferred during the unwind.
pub unsafe fn yield_resolve(ctx: &mut Context) -> (*mut Block, *mut Block) {
    debug_assert_eq!(ctx.yielding, YieldKind::Normal, "yield_resolve: not a normal yield");
    let clause = std::mem::replace(&mut ctx.yield_state.clause, null_mut());
    let count = ctx.yield_state.conts_count;
    let k = if count == 0 {
        // the operation yielded directly under its handler
        unsafe { dup_block(function_id()) }
    } else {
        let mut parts = [null_mut(); YIELD_CONT_MAX];
        parts[..count].copy_from_slice(&ctx.yield_state.conts[..count]);
        unsafe { compose(ctx, &parts[..count]) }
    };
    ctx.yield_state.conts = [null_mut(); YIELD_CONT_MAX];
    ctx.yield_state.conts_count = 0;
    ctx.yield_state.marker = 0;
    ctx.yielding = YieldKind::None;
    unsafe { drain_deferred(ctx) };
    (clause, k)
}

/// The root handler consumes a final yield: returns the clause, clears the
/// yield state, and releases deferred frees.
pub unsafe fn yield_final_resolve(ctx: &mut Context) -> *mut Block {
    debug_assert_eq!(ctx.yielding, YieldKind::Final, "yield_final_resolve: not a final yield");
    debug_assert_eq!(ctx.yield_state.conts_count, 0, "final unwind kept continuations");
    let clause = std::mem::replace(&mut ctx.yield_state.clause, null_mut());
    ctx.yield_state.marker = 0;
    ctx.yielding = YieldKind::None;
    unsafe { drain_deferred(ctx) };
    clause
}

/// Fold the first seven pending entries into one composed value; the eighth
/// shifts down and the sequence continues at two entries.
#[cold]
unsafe fn overflow_compose(ctx: &mut Context) {
    let mut firsts = [null_mut(); YIELD_CONT_MAX - 1];
    firsts.copy_from_slice(&ctx.yield_state.conts[..YIELD_CONT_MAX - 1]);
    let last = ctx.yield_state.conts[YIELD_CONT_MAX - 1];
    let folded = unsafe { compose(ctx, &firsts) };
    ctx.yield_state.conts = [null_mut(); YIELD_CONT_MAX];
    ctx.yield_state.conts[0] = folded;
    ctx.yield_state.conts[1] = last;
    ctx.yield_state.conts_count = 2;
}

/// Build one function value applying `parts` in order, innermost segment
/// first. Takes ownership of every entry.
unsafe fn compose(ctx: &mut Context, parts: &[*mut Block]) -> *mut Block {
    debug_assert!(!parts.is_empty(), "compose: empty sequence");
    if parts.len() == 1 {
        return parts[0];
    }
    TOTAL_CONTS_COMPOSED.fetch_add(parts.len() as u64, Ordering::Relaxed);
    let mut captures = Vec::with_capacity(1 + parts.len());
    captures.push(BoxVal::from_enum(parts.len()));
    for &p in parts {
        captures.push(BoxVal::from_ptr(p as *mut u8));
    }
    unsafe { function_alloc(ctx, composed_code, &captures) }
}

/// Code of a composed continuation. Captures are the segment count followed
/// by the segments themselves. Each invocation duplicates the segment it is
/// about to run, so the composed value can be invoked again. When a segment
/// yields anew, the segments not yet run join the fresh pending sequence and
/// the walk stops.
unsafe extern "C" fn composed_code(f: *mut Block, arg: BoxVal, ctx: *mut Context) -> BoxVal {
    let n = unsafe { function_field(f, 0) }.as_enum();
    let mut x = arg;
    let mut i = 0;
    while i < n {
        let seg = unsafe { function_dup_field(f, 1 + i) }.as_ptr() as *mut Block;
        x = unsafe { function_call(seg, x, ctx) };
        i += 1;
        if unsafe { yielding(&*ctx) } {
            while i < n {
                let rest = unsafe { function_dup_field(f, 1 + i) }.as_ptr() as *mut Block;
                unsafe { yield_extend(&mut *ctx, rest) };
                i += 1;
            }
            break;
        }
    }
    unsafe { drop_block(f, &mut *ctx) };
    x
}

// === FFI ===

/// True when `ctx` is unwinding a yield.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_yielding(ctx: *mut Context) -> bool {
    yielding(unsafe { &*ctx })
}

/// True when `ctx` is unwinding a final yield.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_yielding_final(ctx: *mut Context) -> bool {
    yielding_final(unsafe { &*ctx })
}

/// True when the in-flight yield targets `marker`.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_yield_matches(marker: i32, ctx: *mut Context) -> bool {
    yield_matches(unsafe { &*ctx }, marker)
}

/// Start a yield toward `marker`, taking ownership of the boxed `clause`.
/// Returns the placeholder the yielding frame passes upward.
///
/// # Safety
/// `ctx` must be the calling thread's context; `clause` must box an owned
/// function block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_yield_begin(marker: i32, clause: BoxVal, ctx: *mut Context) -> BoxVal {
    unsafe { yield_begin(&mut *ctx, marker, clause.as_ptr() as *mut Block) };
    BoxVal::NULL
}

/// Start a final yield toward `marker`, taking ownership of the boxed
/// `clause`. Returns the placeholder the yielding frame passes upward.
///
/// # Safety
/// `ctx` must be the calling thread's context; `clause` must box an owned
/// function block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_yield_final(marker: i32, clause: BoxVal, ctx: *mut Context) -> BoxVal {
    unsafe { yield_final(&mut *ctx, marker, clause.as_ptr() as *mut Block) };
    BoxVal::NULL
}

/// Append a frame's boxed resumption to the pending sequence.
///
/// # Safety
/// `ctx` must be the calling thread's context; `cont` must box an owned
/// function block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_yield_extend(cont: BoxVal, ctx: *mut Context) {
    unsafe { yield_extend(&mut *ctx, cont.as_ptr() as *mut Block) };
}

/// Consume a normal yield at its handler frame. Writes the boxed clause to
/// `clause_out` and returns the boxed composed continuation; the caller owns
/// both.
///
/// # Safety
/// `ctx` must be the calling thread's context; `clause_out` must be valid
/// for one write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_yield_resolve(clause_out: *mut BoxVal, ctx: *mut Context) -> BoxVal {
    let (clause, k) = unsafe { yield_resolve(&mut *ctx) };
    unsafe { clause_out.write(BoxVal::from_ptr(clause as *mut u8)) };
    BoxVal::from_ptr(k as *mut u8)
}

/// Consume a final yield at the root handler. Returns the boxed clause; the
/// caller owns it.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_yield_final_resolve(ctx: *mut Context) -> BoxVal {
    BoxVal::from_ptr(unsafe { yield_final_resolve(&mut *ctx) } as *mut u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refcount::dup_boxed;
    use tern_core::Tag;

    unsafe extern "C" fn add_code(f: *mut Block, arg: BoxVal, ctx: *mut Context) -> BoxVal {
        let n = unsafe { function_field(f, 0) }.as_int();
        let r = BoxVal::from_int(arg.as_int() + n);
        unsafe { drop_block(f, &mut *ctx) };
        r
    }

    unsafe fn add_fn(ctx: &mut Context, n: i64) -> *mut Block {
        unsafe { function_alloc(ctx, add_code, &[BoxVal::from_int(n)]) }
    }

    // a frame body that performs again: yields with a trivial clause and
    // returns the placeholder, like generated code would
    unsafe extern "C" fn reyield_code(f: *mut Block, _arg: BoxVal, ctx: *mut Context) -> BoxVal {
        let marker = unsafe { function_field(f, 0) }.as_int() as i32;
        let clause = unsafe { dup_block(function_id()) };
        unsafe {
            yield_begin(&mut *ctx, marker, clause);
            drop_block(f, &mut *ctx);
        }
        BoxVal::NULL
    }

    #[test]
    fn test_yield_records_marker_and_clause() {
        let mut ctx = Context::new();
        unsafe {
            let clause = add_fn(&mut ctx, 7);
            yield_begin(&mut ctx, 42, clause);
            assert!(yielding(&ctx));
            assert!(yielding_non_final(&ctx));
            assert!(yield_matches(&ctx, 42));
            assert!(!yield_matches(&ctx, 41));

            let (c, k) = yield_resolve(&mut ctx);
            assert!(!yielding(&ctx));
            assert_eq!(c, clause);
            // no frames appended, so the continuation is the identity
            assert_eq!(k, function_id());

            assert_eq!(function_call(k, BoxVal::from_int(5), &mut ctx as *mut _).as_int(), 5);
            assert_eq!(function_call(c, BoxVal::from_int(5), &mut ctx as *mut _).as_int(), 12);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_segments_apply_innermost_first() {
        let mut ctx = Context::new();
        unsafe {
            let clause = dup_block(function_id());
            yield_begin(&mut ctx, 1, clause);
            // unwind order: +1 is the innermost frame's resumption
            let f1 = add_fn(&mut ctx, 1);
            let f2 = add_fn(&mut ctx, 2);
            let f3 = add_fn(&mut ctx, 4);
            yield_extend(&mut ctx, f1);
            yield_extend(&mut ctx, f2);
            yield_extend(&mut ctx, f3);
            assert_eq!(ctx.yield_state.conts_count, 3);

            let (c, k) = yield_resolve(&mut ctx);
            drop_block(c, &mut ctx);
            let r = function_call(k, BoxVal::from_int(100), &mut ctx as *mut _);
            assert_eq!(r.as_int(), 107);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_single_segment_needs_no_wrapper() {
        let mut ctx = Context::new();
        unsafe {
            yield_begin(&mut ctx, 1, dup_block(function_id()));
            let f = add_fn(&mut ctx, 3);
            yield_extend(&mut ctx, f);
            let (c, k) = yield_resolve(&mut ctx);
            drop_block(c, &mut ctx);
            assert_eq!(k, f, "one pending entry is returned as is");
            assert_eq!(function_call(k, BoxVal::from_int(0), &mut ctx as *mut _).as_int(), 3);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_ten_frames_overflow_the_sequence_once() {
        let mut ctx = Context::new();
        unsafe {
            yield_begin(&mut ctx, 1, dup_block(function_id()));
            for i in 1..=10 {
                let f = add_fn(&mut ctx, i);
                yield_extend(&mut ctx, f);
            }
            // eight filled, the ninth folded seven into one, two appends after
            assert_eq!(ctx.yield_state.conts_count, 4);

            let (c, k) = yield_resolve(&mut ctx);
            drop_block(c, &mut ctx);
            let r = function_call(k, BoxVal::from_int(0), &mut ctx as *mut _);
            assert_eq!(r.as_int(), (1..=10).sum::<i64>());
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_final_yield_releases_continuations() {
        let mut ctx = Context::new();
        unsafe {
            let clause = add_fn(&mut ctx, 9);
            yield_final(&mut ctx, 5, clause);
            assert!(yielding_final(&ctx));
            assert!(yield_matches(&ctx, 5));

            let live_before = ctx.heap.counters().live_blocks;
            let f = add_fn(&mut ctx, 1);
            yield_extend(&mut ctx, f);
            assert_eq!(ctx.yield_state.conts_count, 0);
            assert_eq!(ctx.heap.counters().live_blocks, live_before, "resumption released on append");

            let c = yield_final_resolve(&mut ctx);
            assert!(!yielding(&ctx));
            assert_eq!(function_call(c, BoxVal::from_int(1), &mut ctx as *mut _).as_int(), 10);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_composed_continuation_is_multi_shot() {
        let mut ctx = Context::new();
        unsafe {
            yield_begin(&mut ctx, 1, dup_block(function_id()));
            let f1 = add_fn(&mut ctx, 10);
            let f2 = add_fn(&mut ctx, 20);
            yield_extend(&mut ctx, f1);
            yield_extend(&mut ctx, f2);
            let (c, k) = yield_resolve(&mut ctx);
            drop_block(c, &mut ctx);

            let k2 = dup_block(k);
            assert_eq!(function_call(k, BoxVal::from_int(0), &mut ctx as *mut _).as_int(), 30);
            assert_eq!(function_call(k2, BoxVal::from_int(5), &mut ctx as *mut _).as_int(), 35);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_reyield_carries_remaining_segments_over() {
        let mut ctx = Context::new();
        unsafe {
            yield_begin(&mut ctx, 1, dup_block(function_id()));
            let f1 = function_alloc(&mut ctx, reyield_code, &[BoxVal::from_int(2)]);
            let f2 = add_fn(&mut ctx, 100);
            let f3 = add_fn(&mut ctx, 1000);
            yield_extend(&mut ctx, f1);
            yield_extend(&mut ctx, f2);
            yield_extend(&mut ctx, f3);
            let (c, k) = yield_resolve(&mut ctx);
            drop_block(c, &mut ctx);

            // the first segment performs again; the other two must survive
            // into the new pending sequence
            let placeholder = function_call(k, BoxVal::from_int(0), &mut ctx as *mut _);
            assert!(placeholder.is_null());
            assert!(yield_matches(&ctx, 2));
            assert_eq!(ctx.yield_state.conts_count, 2);

            let (c2, k2) = yield_resolve(&mut ctx);
            drop_block(c2, &mut ctx);
            let r = function_call(k2, BoxVal::from_int(0), &mut ctx as *mut _);
            assert_eq!(r.as_int(), 1100);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_resolve_drains_deferred_frees() {
        let mut ctx = Context::new();
        ctx.deferred_limit = 1;
        unsafe {
            // a chain deep enough to defer its tail
            let mut b = Block::alloc(&mut ctx.heap, crate::block::size_of_block(1, 0), 1, Tag(60));
            Block::set_field(b, 0, BoxVal::UNIT);
            for _ in 0..4 {
                let outer = Block::alloc(&mut ctx.heap, crate::block::size_of_block(1, 0), 1, Tag(60));
                Block::set_field(outer, 0, BoxVal::from_ptr(b as *mut u8));
                b = outer;
            }
            yield_begin(&mut ctx, 1, dup_block(function_id()));
            drop_block(b, &mut ctx);
            assert!(!ctx.delayed_free.is_empty(), "deep chain should defer");

            let (c, k) = yield_resolve(&mut ctx);
            assert!(ctx.delayed_free.is_empty(), "resolve is a drain point");
            assert_eq!(ctx.heap.counters().live_blocks, 0);
            drop_block(c, &mut ctx);
            drop_block(k, &mut ctx);
        }
    }
}
