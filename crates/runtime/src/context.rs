//! Per-thread runtime context
//!
//! Every generated function threads a `*mut Context` through its calls. The
//! context owns the thread's heap handle, the current evidence vector, the
//! in-flight yield state, the deferred-free list, and the unique-value
//! counters. Nothing in it is shared; cross-thread visibility goes through
//! the statistics registry and promoted blocks only.
//!
//! The context accessor is lazy: the first `tern_context()` call on a thread
//! builds the context (and, process-wide, installs the diagnostics handler
//! and stamps the start time for the at-exit report). Teardown drops every
//! owned value, drains the deferred list, folds the heap counters into the
//! registry's retired totals, and releases the statistics slot.

use std::cell::RefCell;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tern_core::memory_stats::current_thread_id;
use tern_core::{BoxVal, fatal_error};

use crate::block::Block;
use crate::effects::{YieldKind, YieldState};
use crate::heap::Heap;
use crate::integer::{integer_dup, integer_inc};
use crate::refcount::{drain_deferred, drop_boxed, dup_block};
use crate::vector::vector_empty;

/// Cascade depth before frees divert to the deferred list.
const DEFAULT_DEFERRED_LIMIT: usize = 100;

/// Contexts created since process start.
pub static TOTAL_CONTEXTS_CREATED: AtomicU64 = AtomicU64::new(0);
/// Effect markers minted since process start.
pub static TOTAL_MARKERS_MINTED: AtomicU64 = AtomicU64::new(0);

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Wall-clock duration since the first context was created, in milliseconds.
pub fn elapsed_ms() -> u128 {
    START_TIME.get().map(|t| t.elapsed().as_millis()).unwrap_or(0)
}

/// The per-thread state every runtime entry point receives.
pub struct Context {
    /// Current unwind mode; checked by generated code after every call.
    pub(crate) yielding: YieldKind,
    pub(crate) heap: Heap,
    /// Evidence for the handlers currently in scope: the empty-vector
    /// singleton, a single evidence block, or a vector of evidence blocks.
    pub(crate) evv: BoxVal,
    pub(crate) yield_state: YieldState,
    marker_unique: i32,
    pub(crate) delayed_free: Vec<*mut Block>,
    pub(crate) deferred_limit: usize,
    /// Thread-unique integer source for `gen_unique`.
    unique: BoxVal,
    pub thread_id: u64,
    log: BoxVal,
    out: BoxVal,
}

impl Context {
    pub fn new() -> Context {
        START_TIME.get_or_init(Instant::now);
        #[cfg(all(unix, feature = "diagnostics"))]
        crate::diagnostics::install_signal_handler();
        TOTAL_CONTEXTS_CREATED.fetch_add(1, Ordering::Relaxed);

        let heap = Heap::new();
        let evv = BoxVal::from_ptr(unsafe { dup_block(vector_empty()) } as *mut u8);
        Context {
            yielding: YieldKind::None,
            heap,
            evv,
            yield_state: YieldState::default(),
            marker_unique: 1,
            delayed_free: Vec::new(),
            deferred_limit: parse_deferred_limit(),
            unique: BoxVal::from_int(0),
            thread_id: current_thread_id(),
            log: BoxVal::NULL,
            out: BoxVal::NULL,
        }
    }

    /// Mint a fresh handler marker. Markers are compared for identity only;
    /// the counter wraps rather than ever blocking an install.
    pub fn next_marker(&mut self) -> i32 {
        let m = self.marker_unique;
        self.marker_unique = self.marker_unique.wrapping_add(1);
        TOTAL_MARKERS_MINTED.fetch_add(1, Ordering::Relaxed);
        m
    }

    /// Return the current unique integer and advance the stored one.
    pub fn gen_unique(&mut self) -> BoxVal {
        let u = self.unique;
        let next = unsafe { integer_dup(u) };
        self.unique = unsafe { integer_inc(next, self) };
        u
    }

    /// Install the log hook, dropping any previous one. `NULL` clears it.
    ///
    /// # Safety
    /// `f` must be `NULL` or an owned function value.
    pub unsafe fn set_log_hook(&mut self, f: BoxVal) {
        let old = std::mem::replace(&mut self.log, f);
        unsafe { drop_boxed(old, self) };
    }

    /// Install the output hook, dropping any previous one. `NULL` clears it.
    ///
    /// # Safety
    /// `f` must be `NULL` or an owned function value.
    pub unsafe fn set_out_hook(&mut self, f: BoxVal) {
        let old = std::mem::replace(&mut self.out, f);
        unsafe { drop_boxed(old, self) };
    }

    /// Current log hook, with an owner added for the caller. `NULL` if unset.
    pub fn log_hook(&mut self) -> BoxVal {
        unsafe { crate::refcount::dup_boxed(self.log) }
    }

    /// Current output hook, with an owner added for the caller. `NULL` if unset.
    pub fn out_hook(&mut self) -> BoxVal {
        unsafe { crate::refcount::dup_boxed(self.out) }
    }

    /// Heap counter snapshot for this thread.
    pub fn heap_counters(&self) -> &tern_core::memory_stats::HeapCounters {
        self.heap.counters()
    }

    fn teardown(&mut self) {
        if self.yielding != YieldKind::None {
            fatal_error!(
                libc::EFAULT,
                "context teardown while yielding: effect marker {} was never handled",
                self.yield_state.marker
            );
        }
        debug_assert!(self.yield_state.clause.is_null(), "teardown: stale yield clause");
        debug_assert_eq!(self.yield_state.conts_count, 0, "teardown: stale continuations");

        unsafe {
            let evv = std::mem::replace(&mut self.evv, BoxVal::NULL);
            drop_boxed(evv, self);
            let unique = std::mem::replace(&mut self.unique, BoxVal::NULL);
            drop_boxed(unique, self);
            let log = std::mem::replace(&mut self.log, BoxVal::NULL);
            drop_boxed(log, self);
            let out = std::mem::replace(&mut self.out, BoxVal::NULL);
            drop_boxed(out, self);
            drain_deferred(self);
        }
        self.heap.release_slot();
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn parse_deferred_limit() -> usize {
    match std::env::var("TERN_DEFERRED_LIMIT") {
        Err(_) => DEFAULT_DEFERRED_LIMIT,
        Ok(s) => match s.parse::<usize>() {
            Ok(n) if n >= 1 => n,
            _ => {
                eprintln!(
                    "Warning: invalid TERN_DEFERRED_LIMIT '{}', using default {}",
                    s, DEFAULT_DEFERRED_LIMIT
                );
                DEFAULT_DEFERRED_LIMIT
            }
        },
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<Box<Context>>> = const { RefCell::new(None) };
}

/// The calling thread's context, created on first use. The pointer stays
/// valid until `tern_context_teardown` on the same thread.
///
/// # Safety
/// The pointer must not be used after teardown, and never from another
/// thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_context() -> *mut Context {
    CONTEXT.with(|c| {
        let mut slot = c.borrow_mut();
        let ctx = slot.get_or_insert_with(|| Box::new(Context::new()));
        &mut **ctx as *mut Context
    })
}

/// Tear down the calling thread's context: drops owned values, drains the
/// deferred list, and releases the statistics slot. Idempotent.
///
/// # Safety
/// No context pointer obtained earlier on this thread may be used afterward.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_context_teardown() {
    CONTEXT.with(|c| {
        c.borrow_mut().take();
    });
}

/// Mint a fresh handler marker.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_next_marker(ctx: *mut Context) -> i32 {
    unsafe { (*ctx).next_marker() }
}

/// Return the current unique integer, advancing the stored one.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_gen_unique(ctx: *mut Context) -> BoxVal {
    unsafe { (*ctx).gen_unique() }
}

/// Install the log hook, dropping any previous one.
///
/// # Safety
/// `ctx` must be the calling thread's context; `f` must be `NULL` or an
/// owned function value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_set_log_hook(f: BoxVal, ctx: *mut Context) {
    unsafe { (*ctx).set_log_hook(f) }
}

/// Install the output hook, dropping any previous one.
///
/// # Safety
/// `ctx` must be the calling thread's context; `f` must be `NULL` or an
/// owned function value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_set_out_hook(f: BoxVal, ctx: *mut Context) {
    unsafe { (*ctx).set_out_hook(f) }
}
