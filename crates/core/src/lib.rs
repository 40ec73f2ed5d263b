//! Tern Core: object-model primitives for the Tern runtime
//!
//! This crate holds the context-free layer of the runtime: how a value is
//! encoded in one machine word, how a heap block's header is laid out, and
//! the cross-cutting pieces (fatal tier, statistics registry) both the
//! runtime crate and tooling link against.
//!
//! Key design principles:
//! - BoxVal: one 64-bit word is a block pointer or a tagged direct value,
//!   discriminated by a two-bit test
//! - Header: 8 bytes shared by every heap block, holding a 32-bit refcount
//!   ("0 = unique"), tag, scan-field count, and flags
//! - Nothing here touches a heap or a context; allocation and lifecycle
//!   live in `tern-runtime`
//!
//! # Modules
//!
//! - `boxed`: box-word encoding (pointer / fixnum / direct scalar)
//! - `tag`: the closed tag set with its contiguous raw suffix
//! - `header`: block header layout and refcount bands
//! - `fatal`: the abort primitive for internal-consistency violations
//! - `memory_stats`: cross-thread heap statistics registry

pub mod boxed;
pub mod fatal;
pub mod header;
pub mod memory_stats;
pub mod tag;

// Re-export key types and constants
pub use boxed::{
    BoxVal, KIND_INT, KIND_MASK, KIND_PTR, KIND_SHIFT, KIND_VALUE, MAX_DIRECT, MAX_FIXNUM,
    MIN_FIXNUM,
};
pub use header::{FLAG_THREAD_SHARED, Header, RC_SHARED, RC_STICKY, SCAN_MAX};
pub use tag::Tag;

// Fatal tier
pub use fatal::fatal_error_fmt;

// Statistics registry
pub use memory_stats::{
    AggregateRuntimeStats, HeapCounters, RuntimeStatsRegistry, current_thread_id, runtime_registry,
};
