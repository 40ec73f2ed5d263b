//! Tern Runtime: the heap object model and effect machinery that compiled
//! programs link against
//!
//! Key design principles:
//! - BoxVal: one machine word carrying a block pointer, small integer, or
//!   direct value (tern-core)
//! - Block: refcounted heap object behind an 8-byte header (refcount, tag,
//!   scan count); everything the language touches is one
//! - Context: per-thread state holding the heap, the evidence vector of
//!   installed handlers, and the in-flight yield
//! - Effects unwind as data: performing an operation flips the context into
//!   yield mode, frames append resumption closures on the way out, and the
//!   handler composes them back into an ordinary function value

pub mod block;
pub mod context;
#[cfg(feature = "diagnostics")]
pub mod diagnostics;
pub mod effects;
pub mod evidence;
pub mod function;
pub mod heap;
pub mod integer;
pub mod refcount;
pub mod report;
#[cfg(not(feature = "diagnostics"))]
pub mod report_stub;
pub mod reuse;
pub mod values;
pub mod vector;

// Re-export key types
pub use block::Block;
pub use context::Context;
pub use effects::{YIELD_CONT_MAX, YieldKind};
pub use function::FunPtr;
pub use heap::Heap;
pub use integer::BigintOps;
pub use refcount::RawFreeFun;
pub use reuse::Orphan;
pub use tern_core::{BoxVal, Tag};

// Context operations (exported for LLVM linking)
pub use context::{
    tern_context as context, tern_context_teardown as context_teardown,
    tern_gen_unique as gen_unique, tern_next_marker as next_marker,
    tern_set_log_hook as set_log_hook, tern_set_out_hook as set_out_hook,
};

// Block allocation (exported for LLVM linking)
pub use block::{
    tern_block_alloc as block_alloc, tern_block_alloc_large as block_alloc_large,
    tern_block_realloc as block_realloc,
};

// Refcount lifecycle (exported for LLVM linking)
pub use refcount::{
    tern_drain_deferred as drain_deferred, tern_drop as drop, tern_dup as dup,
    tern_is_unique as is_unique, tern_mark_shared as mark_shared,
};

// Orphan reuse (exported for LLVM linking)
pub use reuse::{
    tern_block_alloc_reuse as block_alloc_reuse, tern_block_discard as block_discard,
    tern_block_release0 as block_release0, tern_block_release1 as block_release1,
};

// Function values (exported for LLVM linking)
pub use function::tern_function_call as function_call;

// Typed block views (exported for LLVM linking)
pub use values::{
    tern_box_double as box_double, tern_box_int64 as box_int64, tern_bytes_alloc as bytes_alloc,
    tern_bytes_buf as bytes_buf, tern_bytes_len as bytes_len,
    tern_cptr_raw_alloc as cptr_raw_alloc, tern_cptr_raw_get as cptr_raw_get,
    tern_ref_alloc as ref_alloc, tern_ref_get as ref_get, tern_ref_set as ref_set,
    tern_ref_swap as ref_swap, tern_unbox_double as unbox_double,
    tern_unbox_int64 as unbox_int64,
};

// Vector operations (exported for LLVM linking)
pub use vector::{
    tern_vector_alloc as vector_alloc, tern_vector_at as vector_at,
    tern_vector_buf as vector_buf, tern_vector_len as vector_len,
};

// Evidence operations (exported for LLVM linking)
pub use evidence::{
    tern_evidence_hstate as evidence_hstate, tern_evidence_marker as evidence_marker,
    tern_evv_at as evv_at, tern_evv_count as evv_count, tern_evv_get as evv_get,
    tern_evv_lookup as evv_lookup, tern_evv_set as evv_set,
    tern_handler_install as handler_install, tern_handler_uninstall as handler_uninstall,
};

// Yield operations (exported for LLVM linking)
pub use effects::{
    tern_yield_begin as yield_begin, tern_yield_extend as yield_extend,
    tern_yield_final as yield_final, tern_yield_final_resolve as yield_final_resolve,
    tern_yield_matches as yield_matches, tern_yield_resolve as yield_resolve,
    tern_yielding as yielding, tern_yielding_final as yielding_final,
};

// Arbitrary-precision integer interface (exported for LLVM linking)
pub use integer::{
    tern_install_bigint_ops as install_bigint_ops, tern_integer_dup as integer_dup,
    tern_integer_free as integer_free, tern_integer_inc as integer_inc,
};

// At-exit report (exported for LLVM linking)
#[cfg(feature = "diagnostics")]
pub use report::tern_report as report;
#[cfg(not(feature = "diagnostics"))]
pub use report_stub::tern_report as report;
