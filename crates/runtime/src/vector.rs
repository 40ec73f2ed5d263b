//! Vectors of boxed values
//!
//! Two shapes behind one interface. A small vector keeps its boxed length
//! and elements as ordinary scan fields; a large one switches the header to
//! the overflow sentinel and carries the true count in front:
//!
//! ```text
//!   small: [header scan=1+n][len][e0]..[e n-1]        tag VECTOR_SMALL
//!   large: [header scan=FF][count][len][e0]..[e n-1]  tag VECTOR
//! ```
//!
//! Length zero is the pinned empty singleton; allocating it is a dup that
//! costs nothing. The fill value is stored without count adjustment (the
//! caller supplies one reference per element), and a null fill leaves the
//! elements uninitialized for the caller to write through `vector_buf`.

use std::sync::OnceLock;

use tern_core::{BoxVal, SCAN_MAX, Tag, fatal_error};

use crate::block::{Block, size_of_block};
use crate::context::Context;
use crate::refcount::{dup_block, dup_boxed};

struct PinnedBlock(*mut Block);
// pinned and immutable after init
unsafe impl Send for PinnedBlock {}
unsafe impl Sync for PinnedBlock {}

static VECTOR_EMPTY: OnceLock<PinnedBlock> = OnceLock::new();

/// The empty vector. Process-wide, pinned, never freed.
pub fn vector_empty() -> *mut Block {
    VECTOR_EMPTY
        .get_or_init(|| {
            let b = unsafe { libc::malloc(size_of_block(1, 0)) } as *mut Block;
            if b.is_null() {
                fatal_error!(libc::ENOMEM, "empty vector allocation failed");
            }
            unsafe {
                Block::init_static(b, Tag::VECTOR_SMALL, 1);
                Block::words(b).write(BoxVal::from_enum(0));
            }
            PinnedBlock(b)
        })
        .0
}

/// Allocate a vector of `length` elements, each set to `fill`. Stores
/// `fill` without adjusting counts; pass `NULL` to leave the elements
/// uninitialized and write them through `vector_buf` before any drop.
pub unsafe fn vector_alloc(ctx: &mut Context, length: usize, fill: BoxVal) -> *mut Block {
    if length == 0 {
        return unsafe { dup_block(vector_empty()) };
    }
    let v = if 1 + length < SCAN_MAX as usize {
        Block::alloc(&mut ctx.heap, size_of_block(1 + length, 0), 1 + length, Tag::VECTOR_SMALL)
    } else {
        // extra word for the count, then length box and elements
        Block::alloc_large(&mut ctx.heap, size_of_block(2 + length, 0), 1 + length, Tag::VECTOR)
    };
    unsafe {
        let fields = Block::fields(v);
        fields.write(BoxVal::from_enum(length));
        if !fill.is_null() {
            for i in 0..length {
                fields.add(1 + i).write(fill);
            }
        }
    }
    v
}

/// Number of elements.
///
/// # Safety
/// `v` must be a live vector block.
#[inline]
pub unsafe fn vector_len(v: *mut Block) -> usize {
    debug_assert!(
        matches!(unsafe { (*v).header().tag() }, Tag::VECTOR_SMALL | Tag::VECTOR),
        "vector_len: not a vector block"
    );
    unsafe { Block::fields(v).read().as_enum() }
}

/// Element storage. Valid for `vector_len` elements; writes through it do
/// not adjust counts.
///
/// # Safety
/// `v` must be a live vector block.
#[inline]
pub unsafe fn vector_buf(v: *mut Block) -> *mut BoxVal {
    unsafe { Block::fields(v).add(1) }
}

/// Element `i`, with an owner added for the caller.
///
/// # Safety
/// `v` must be a live vector block with more than `i` elements.
#[inline]
pub unsafe fn vector_at(v: *mut Block, i: usize) -> BoxVal {
    debug_assert!(i < unsafe { vector_len(v) }, "vector_at: index {} out of range", i);
    unsafe { dup_boxed(vector_buf(v).add(i).read()) }
}

/// Allocate a vector of `length` copies of `fill` and box it. The caller
/// supplies one reference per element; a null fill leaves the elements
/// uninitialized.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_vector_alloc(length: usize, fill: BoxVal, ctx: *mut Context) -> BoxVal {
    BoxVal::from_ptr(unsafe { vector_alloc(&mut *ctx, length, fill) } as *mut u8)
}

/// Number of elements of a boxed vector.
///
/// # Safety
/// `v` must box a live vector block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_vector_len(v: BoxVal) -> usize {
    unsafe { vector_len(v.as_ptr() as *mut Block) }
}

/// Element `i` of a boxed vector, with an owner added.
///
/// # Safety
/// `v` must box a live vector block with more than `i` elements.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_vector_at(v: BoxVal, i: usize) -> BoxVal {
    unsafe { vector_at(v.as_ptr() as *mut Block, i) }
}

/// Element storage of a boxed vector; writes the length to `len_out` when
/// non-null.
///
/// # Safety
/// `v` must box a live vector block; `len_out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_vector_buf(v: BoxVal, len_out: *mut usize) -> *mut BoxVal {
    let b = v.as_ptr() as *mut Block;
    if !len_out.is_null() {
        unsafe { len_out.write(vector_len(b)) };
    }
    unsafe { vector_buf(b) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refcount::{drop_block, drop_boxed, dup_block, is_unique};

    #[test]
    fn test_length_zero_is_the_pinned_singleton() {
        let mut ctx = Context::new();
        unsafe {
            let a = vector_alloc(&mut ctx, 0, BoxVal::NULL);
            let b = vector_alloc(&mut ctx, 0, BoxVal::NULL);
            assert_eq!(a, b);
            assert_eq!(a, vector_empty());
            assert_eq!(vector_len(a), 0);
            assert_eq!(ctx.heap.counters().blocks_allocated, 0, "no heap traffic");
            drop_block(a, &mut ctx);
            drop_block(b, &mut ctx);
        }
    }

    #[test]
    fn test_small_vector_roundtrip() {
        let mut ctx = Context::new();
        unsafe {
            let v = vector_alloc(&mut ctx, 3, BoxVal::NULL);
            assert_eq!((*v).header().tag(), Tag::VECTOR_SMALL);
            assert_eq!(vector_len(v), 3);
            let buf = vector_buf(v);
            for i in 0..3 {
                buf.add(i).write(BoxVal::from_int(i as i64 * 10));
            }
            assert_eq!(vector_at(v, 0).as_int(), 0);
            assert_eq!(vector_at(v, 2).as_int(), 20);
            drop_block(v, &mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_large_vector_uses_sentinel() {
        let mut ctx = Context::new();
        for n in [254usize, 255, 1000] {
            unsafe {
                let mut ctx2 = Context::new();
                let v = vector_alloc(&mut ctx2, n, BoxVal::from_int(1));
                assert_eq!((*v).header().tag(), Tag::VECTOR, "length {} takes the large form", n);
                assert_eq!((*v).header().scan_fsize(), SCAN_MAX);
                assert_eq!(vector_len(v), n);
                assert_eq!(Block::scan_count(v), 1 + n);
                assert_eq!(vector_at(v, n - 1).as_int(), 1);
                drop_block(v, &mut ctx2);
                assert_eq!(ctx2.heap.counters().live_blocks, 0);
            }
        }
        let _ = &mut ctx;
    }

    #[test]
    fn test_vector_at_adds_an_owner() {
        let mut ctx = Context::new();
        unsafe {
            let elem = Block::alloc(&mut ctx.heap, size_of_block(0, 0), 0, Tag(31));
            let v = vector_alloc(&mut ctx, 1, BoxVal::NULL);
            vector_buf(v).write(BoxVal::from_ptr(elem as *mut u8));
            assert!(is_unique(elem));

            let got = vector_at(v, 0);
            assert!(!is_unique(elem), "element gained an owner");
            drop_boxed(got, &mut ctx);
            drop_block(v, &mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_dropping_a_vector_drops_its_elements() {
        let mut ctx = Context::new();
        unsafe {
            let a = Block::alloc(&mut ctx.heap, size_of_block(0, 0), 0, Tag(32));
            let b = Block::alloc(&mut ctx.heap, size_of_block(0, 0), 0, Tag(33));
            let v = vector_alloc(&mut ctx, 2, BoxVal::NULL);
            let buf = vector_buf(v);
            buf.write(BoxVal::from_ptr(a as *mut u8));
            buf.add(1).write(BoxVal::from_ptr(b as *mut u8));
            assert_eq!(ctx.heap.counters().live_blocks, 3);
            drop_block(v, &mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_shared_fill_accounts_every_slot() {
        let mut ctx = Context::new();
        unsafe {
            let elem = Block::alloc(&mut ctx.heap, size_of_block(0, 0), 0, Tag(34));
            // hand the vector one reference per slot up front
            for _ in 0..4 {
                dup_block(elem);
            }
            let v = vector_alloc(&mut ctx, 5, BoxVal::from_ptr(elem as *mut u8));
            drop_block(v, &mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0, "all five references consumed");
        }
    }
}
