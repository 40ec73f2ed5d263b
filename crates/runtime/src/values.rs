//! Reference cells, boxed numbers, foreign pointers, byte vectors
//!
//! The leaf value kinds: everything here is either a one-field block or a
//! block wrapping raw payload bytes.
//!
//! Ref cells are thread-local mutable state; the lifecycle never
//! synchronizes them, so a ref that crosses threads must stay read-only.
//! An `i64` boxes as a fixnum when it fits the 62-bit range and spills to a
//! heap block otherwise; doubles always take a block. Raw-tagged blocks
//! carry a foreign pointer and its free function in the two unscanned
//! payload words where the lifecycle expects them.

use tern_core::{BoxVal, MAX_FIXNUM, MIN_FIXNUM, Tag};

use crate::block::{Block, WORD_SIZE, size_of_block};
use crate::context::Context;
use crate::refcount::{RawFreeFun, drop_boxed, dup_boxed};

// === Reference cells ===

/// Allocate a ref cell owning `value`.
pub unsafe fn ref_alloc(ctx: &mut Context, value: BoxVal) -> *mut Block {
    let r = Block::alloc(&mut ctx.heap, size_of_block(1, 0), 1, Tag::REF);
    unsafe { Block::set_field(r, 0, value) };
    r
}

/// Read the cell, adding an owner to the value.
///
/// # Safety
/// `r` must be a live ref block.
#[inline]
pub unsafe fn ref_get(r: *mut Block) -> BoxVal {
    debug_assert_eq!(unsafe { (*r).header().tag() }, Tag::REF, "ref_get: not a ref block");
    unsafe { dup_boxed(Block::field(r, 0)) }
}

/// Store `value`, dropping the previous content.
///
/// # Safety
/// `r` must be a live ref block; `value` must be owned by the caller.
#[inline]
pub unsafe fn ref_set(r: *mut Block, value: BoxVal, ctx: &mut Context) {
    debug_assert_eq!(unsafe { (*r).header().tag() }, Tag::REF, "ref_set: not a ref block");
    let old = unsafe { Block::field(r, 0) };
    unsafe {
        drop_boxed(old, ctx);
        Block::set_field(r, 0, value);
    }
}

/// Store `value` and return the previous content with its count untouched;
/// ownership of the old value passes to the caller.
///
/// # Safety
/// `r` must be a live ref block; `value` must be owned by the caller.
#[inline]
pub unsafe fn ref_swap(r: *mut Block, value: BoxVal) -> BoxVal {
    debug_assert_eq!(unsafe { (*r).header().tag() }, Tag::REF, "ref_swap: not a ref block");
    let old = unsafe { Block::field(r, 0) };
    unsafe { Block::set_field(r, 0, value) };
    old
}

// === Boxed numbers ===

/// Box an `i64`: fixnum when it fits, heap block otherwise.
pub unsafe fn box_int64(ctx: &mut Context, i: i64) -> BoxVal {
    if (MIN_FIXNUM..=MAX_FIXNUM).contains(&i) {
        BoxVal::from_int(i)
    } else {
        let b = Block::alloc(&mut ctx.heap, size_of_block(0, WORD_SIZE), 0, Tag::INT64);
        unsafe { (Block::words(b) as *mut i64).write(i) };
        BoxVal::from_ptr(b as *mut u8)
    }
}

/// Unbox an `i64` from either representation.
///
/// # Safety
/// `v` must be a fixnum or box a live INT64 block.
pub unsafe fn unbox_int64(v: BoxVal) -> i64 {
    if v.is_fixnum() {
        v.as_int()
    } else {
        let b = v.as_ptr() as *mut Block;
        debug_assert_eq!(unsafe { (*b).header().tag() }, Tag::INT64, "unbox_int64: not an int64 block");
        unsafe { (Block::words(b) as *mut i64).read() }
    }
}

/// Box a double. Always heap-allocated; the payload is the raw bit pattern.
pub unsafe fn box_double(ctx: &mut Context, d: f64) -> BoxVal {
    let b = Block::alloc(&mut ctx.heap, size_of_block(0, WORD_SIZE), 0, Tag::DOUBLE);
    unsafe { (Block::words(b) as *mut u64).write(d.to_bits()) };
    BoxVal::from_ptr(b as *mut u8)
}

/// Unbox a double.
///
/// # Safety
/// `v` must box a live DOUBLE block.
pub unsafe fn unbox_double(v: BoxVal) -> f64 {
    let b = v.as_ptr() as *mut Block;
    debug_assert_eq!(unsafe { (*b).header().tag() }, Tag::DOUBLE, "unbox_double: not a double block");
    f64::from_bits(unsafe { (Block::words(b) as *mut u64).read() })
}

// === Foreign pointers ===

/// Wrap a foreign pointer. `free_fun` runs exactly once when the last owner
/// drops the block; pass `None` for borrowed pointers.
pub unsafe fn cptr_raw_alloc(ctx: &mut Context, free_fun: Option<RawFreeFun>, p: *mut u8) -> *mut Block {
    let b = Block::alloc(&mut ctx.heap, size_of_block(2, 0), 0, Tag::CPTR_RAW);
    let f = match free_fun {
        Some(f) => BoxVal::from_cptr(f as usize as *const u8),
        None => BoxVal::NULL,
    };
    unsafe {
        Block::words(b).write(f);
        Block::words(b).add(1).write(BoxVal::from_cptr(p));
    }
    b
}

/// The wrapped foreign pointer.
///
/// # Safety
/// `b` must be a live raw-tagged block.
#[inline]
pub unsafe fn cptr_raw_get(b: *mut Block) -> *mut u8 {
    debug_assert!(unsafe { (*b).header().tag() }.is_raw(), "cptr_raw_get: not a raw block");
    unsafe { Block::words(b).add(1).read().as_cptr() }
}

// === Byte vectors ===

/// Allocate an in-place byte vector holding a copy of `data`.
pub unsafe fn bytes_alloc(ctx: &mut Context, data: &[u8]) -> *mut Block {
    // layout: [length word][bytes]; no scan fields
    let b = Block::alloc(&mut ctx.heap, size_of_block(1, data.len()), 0, Tag::BYTES);
    unsafe {
        (Block::words(b) as *mut usize).write(data.len());
        let buf = Block::words(b).add(1) as *mut u8;
        std::ptr::copy_nonoverlapping(data.as_ptr(), buf, data.len());
    }
    b
}

/// Length in bytes.
///
/// # Safety
/// `b` must be a live BYTES block.
#[inline]
pub unsafe fn bytes_len(b: *mut Block) -> usize {
    debug_assert_eq!(unsafe { (*b).header().tag() }, Tag::BYTES, "bytes_len: not a bytes block");
    unsafe { (Block::words(b) as *mut usize).read() }
}

/// The byte payload.
///
/// # Safety
/// `b` must be a live BYTES block.
#[inline]
pub unsafe fn bytes_buf(b: *mut Block) -> *mut u8 {
    debug_assert_eq!(unsafe { (*b).header().tag() }, Tag::BYTES, "bytes_buf: not a bytes block");
    unsafe { Block::words(b).add(1) as *mut u8 }
}

// === FFI ===

/// Allocate a ref cell owning `value` and box it.
///
/// # Safety
/// `ctx` must be the calling thread's context; `value` must be owned by the
/// caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_ref_alloc(value: BoxVal, ctx: *mut Context) -> BoxVal {
    BoxVal::from_ptr(unsafe { ref_alloc(&mut *ctx, value) } as *mut u8)
}

/// Read a boxed ref cell, adding an owner to the value.
///
/// # Safety
/// `r` must box a live ref block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_ref_get(r: BoxVal) -> BoxVal {
    unsafe { ref_get(r.as_ptr() as *mut Block) }
}

/// Store into a boxed ref cell, dropping the previous content. Returns
/// unit.
///
/// # Safety
/// `r` must box a live ref block; `value` must be owned by the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_ref_set(r: BoxVal, value: BoxVal, ctx: *mut Context) -> BoxVal {
    unsafe { ref_set(r.as_ptr() as *mut Block, value, &mut *ctx) };
    BoxVal::UNIT
}

/// Store into a boxed ref cell and return the previous content unadjusted.
///
/// # Safety
/// `r` must box a live ref block; `value` must be owned by the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_ref_swap(r: BoxVal, value: BoxVal) -> BoxVal {
    unsafe { ref_swap(r.as_ptr() as *mut Block, value) }
}

/// Box an `i64`.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_box_int64(i: i64, ctx: *mut Context) -> BoxVal {
    unsafe { box_int64(&mut *ctx, i) }
}

/// Unbox an `i64`.
///
/// # Safety
/// `v` must be a fixnum or box a live INT64 block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_unbox_int64(v: BoxVal) -> i64 {
    unsafe { unbox_int64(v) }
}

/// Box a double.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_box_double(d: f64, ctx: *mut Context) -> BoxVal {
    unsafe { box_double(&mut *ctx, d) }
}

/// Unbox a double.
///
/// # Safety
/// `v` must box a live DOUBLE block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_unbox_double(v: BoxVal) -> f64 {
    unsafe { unbox_double(v) }
}

/// Wrap a foreign pointer with an optional free function and box it.
///
/// # Safety
/// `ctx` must be the calling thread's context; `free_fun` must be null or a
/// function safe to call once with `p`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_cptr_raw_alloc(
    free_fun: Option<RawFreeFun>,
    p: *mut u8,
    ctx: *mut Context,
) -> BoxVal {
    BoxVal::from_ptr(unsafe { cptr_raw_alloc(&mut *ctx, free_fun, p) } as *mut u8)
}

/// The foreign pointer wrapped by a boxed raw block.
///
/// # Safety
/// `v` must box a live raw-tagged block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_cptr_raw_get(v: BoxVal) -> *mut u8 {
    unsafe { cptr_raw_get(v.as_ptr() as *mut Block) }
}

/// Allocate a byte vector copying `len` bytes from `data` and box it.
///
/// # Safety
/// `ctx` must be the calling thread's context; `data` must be valid for
/// `len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_bytes_alloc(data: *const u8, len: usize, ctx: *mut Context) -> BoxVal {
    // generated code may pass null for an empty vector
    let slice = if len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }
    };
    BoxVal::from_ptr(unsafe { bytes_alloc(&mut *ctx, slice) } as *mut u8)
}

/// Length in bytes of a boxed byte vector.
///
/// # Safety
/// `v` must box a live BYTES block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_bytes_len(v: BoxVal) -> usize {
    unsafe { bytes_len(v.as_ptr() as *mut Block) }
}

/// Payload pointer of a boxed byte vector, valid while the caller holds its
/// reference.
///
/// # Safety
/// `v` must box a live BYTES block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_bytes_buf(v: BoxVal) -> *mut u8 {
    unsafe { bytes_buf(v.as_ptr() as *mut Block) }
}
