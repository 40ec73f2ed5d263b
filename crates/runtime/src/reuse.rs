//! In-place reuse of match scrutinees
//!
//! When generated code destructures a constructor it has already extracted
//! the fields it needs, so a uniquely-owned scrutinee's storage can back the
//! next allocation directly instead of round-tripping through the
//! allocator. `release0`/`release1` turn the scrutinee into an *orphan*: the
//! same storage with a zeroed header (unique, no tag, nothing to scan), safe
//! to drop if it never gets reused. A shared scrutinee just loses one owner
//! and the orphan comes back null.
//!
//! The reused storage must be at least as large as the requested block;
//! that is the caller's obligation (generated code reuses within one
//! constructor family, where sizes are known).

use tern_core::{BoxVal, SCAN_MAX, Tag};

use crate::block::Block;
use crate::context::Context;
use crate::refcount::{drop_block, drop_boxed, is_unique};

/// Storage released by a match, ready for reuse. Null when the scrutinee
/// was shared and its storage stayed live.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Orphan(*mut Block);

impl Orphan {
    pub const NULL: Orphan = Orphan(std::ptr::null_mut());

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

#[inline]
unsafe fn orphan_block(b: *mut Block) -> Orphan {
    // zeroed header: unique, tag INVALID, scan 0, so a stray drop just
    // frees the storage
    unsafe { (*b).header_mut().zero() };
    Orphan(b)
}

/// Release a scrutinee whose fields were all extracted. Unique storage
/// becomes an orphan; shared storage loses one owner.
///
/// # Safety
/// `b` must be a live block owned by the caller. On the unique path the
/// caller must have taken ownership of every field already.
pub unsafe fn release0(b: *mut Block, ctx: &mut Context) -> Orphan {
    if unsafe { is_unique(b) } {
        unsafe { orphan_block(b) }
    } else {
        unsafe { drop_block(b, ctx) };
        Orphan::NULL
    }
}

/// Release a scrutinee with one field left unextracted. On the unique path
/// the orphaned storage no longer owns anything, so the unused field is
/// dropped here; on the shared path the still-live block keeps owning it.
///
/// # Safety
/// Same as `release0`; `unused_field` must be the one field the caller did
/// not take.
pub unsafe fn release1(b: *mut Block, unused_field: BoxVal, ctx: &mut Context) -> Orphan {
    if unsafe { is_unique(b) } {
        unsafe {
            drop_boxed(unused_field, ctx);
            orphan_block(b)
        }
    } else {
        unsafe { drop_block(b, ctx) };
        Orphan::NULL
    }
}

/// Free orphaned storage that will not be reused. Null orphans are ignored.
///
/// # Safety
/// `ctx` must be the calling thread's context; the orphan must not be used
/// afterward.
pub unsafe fn discard(o: Orphan, ctx: &mut Context) {
    if !o.is_null() {
        unsafe { ctx.heap.free_raw(o.0 as *mut u8) };
    }
}

/// Allocate a block, reusing the orphan's storage when one is available.
/// The caller guarantees the orphaned storage is at least `size` bytes; a
/// null orphan falls back to a fresh allocation.
///
/// # Safety
/// `ctx` must be the calling thread's context; `size` must not exceed the
/// orphan's original allocation.
pub unsafe fn alloc_reuse(
    o: Orphan,
    size: usize,
    scan_fsize: usize,
    tag: Tag,
    ctx: &mut Context,
) -> *mut Block {
    if o.is_null() {
        return if scan_fsize < SCAN_MAX as usize {
            Block::alloc(&mut ctx.heap, size, scan_fsize, tag)
        } else {
            Block::alloc_large(&mut ctx.heap, size, scan_fsize, tag)
        };
    }
    let b = o.0;
    debug_assert!(unsafe { is_unique(b) }, "alloc_reuse: orphan must be unique");
    debug_assert_eq!(unsafe { (*b).header().tag() }, Tag::INVALID, "alloc_reuse: orphan header not zeroed");
    if scan_fsize < SCAN_MAX as usize {
        unsafe { (*b).header_mut().reinit(tag, scan_fsize as u8) };
    } else {
        // large form: the trailing count word is part of the new shape
        unsafe {
            (*b).header_mut().reinit(tag, SCAN_MAX);
            Block::words(b).write(BoxVal::from_enum(scan_fsize));
        }
    }
    ctx.heap.note_orphan_reuse();
    b
}

/// Release a boxed scrutinee whose fields were all extracted.
///
/// # Safety
/// `b` must box a live block owned by the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_block_release0(b: BoxVal, ctx: *mut Context) -> Orphan {
    unsafe { release0(b.as_ptr() as *mut Block, &mut *ctx) }
}

/// Release a boxed scrutinee with one field left unextracted.
///
/// # Safety
/// `b` must box a live block owned by the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_block_release1(b: BoxVal, unused_field: BoxVal, ctx: *mut Context) -> Orphan {
    unsafe { release1(b.as_ptr() as *mut Block, unused_field, &mut *ctx) }
}

/// Free orphaned storage that will not be reused.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_block_discard(o: Orphan, ctx: *mut Context) {
    unsafe { discard(o, &mut *ctx) }
}

/// Allocate a block, reusing orphaned storage when available.
///
/// # Safety
/// `ctx` must be the calling thread's context; `size` must not exceed the
/// orphan's original allocation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_block_alloc_reuse(
    o: Orphan,
    size: usize,
    scan_fsize: usize,
    tag: Tag,
    ctx: *mut Context,
) -> *mut Block {
    unsafe { alloc_reuse(o, size, scan_fsize, tag, &mut *ctx) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::size_of_block;
    use crate::refcount::{drop_boxed, dup_block};

    /// Two-field pair, fields owned by the block.
    unsafe fn pair(ctx: &mut Context, a: BoxVal, b: BoxVal) -> *mut Block {
        let p = Block::alloc(&mut ctx.heap, size_of_block(2, 0), 2, Tag(21));
        unsafe {
            Block::set_field(p, 0, a);
            Block::set_field(p, 1, b);
        }
        p
    }

    #[test]
    fn test_unique_release_reuses_storage_in_place() {
        let mut ctx = Context::new();
        unsafe {
            let p = pair(&mut ctx, BoxVal::from_int(1), BoxVal::from_int(2));
            let addr = p as usize;

            let o = release0(p, &mut ctx);
            assert!(!o.is_null());
            let q = alloc_reuse(o, size_of_block(2, 0), 2, Tag(22), &mut ctx);
            assert_eq!(q as usize, addr, "storage reused in place");
            assert_eq!((*q).header().tag(), Tag(22));
            assert!(is_unique(q));
            assert_eq!(ctx.heap.counters().orphan_reuses, 1);
            assert_eq!(ctx.heap.counters().blocks_allocated, 1, "no second allocation");

            Block::set_field(q, 0, BoxVal::from_int(3));
            Block::set_field(q, 1, BoxVal::from_int(4));
            drop_block(q, &mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_shared_release_yields_null_orphan() {
        let mut ctx = Context::new();
        unsafe {
            let p = pair(&mut ctx, BoxVal::from_int(1), BoxVal::from_int(2));
            dup_block(p);

            let o = release0(p, &mut ctx);
            assert!(o.is_null());
            assert_eq!(ctx.heap.counters().live_blocks, 1, "shared scrutinee stays live");
            let q = alloc_reuse(o, size_of_block(2, 0), 2, Tag(22), &mut ctx);
            assert_ne!(q as *const Block, p as *const Block);
            assert_eq!(ctx.heap.counters().orphan_reuses, 0);

            Block::set_field(q, 0, BoxVal::UNIT);
            Block::set_field(q, 1, BoxVal::UNIT);
            drop_block(q, &mut ctx);
            drop_block(p, &mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_release1_drops_unused_field_only_when_unique() {
        let mut ctx = Context::new();
        unsafe {
            // unique path: the unused child is freed with the release
            let child = Block::alloc(&mut ctx.heap, size_of_block(0, 0), 0, Tag(23));
            let p = pair(&mut ctx, BoxVal::from_int(9), BoxVal::from_ptr(child as *mut u8));
            let taken = Block::field(p, 0);
            assert_eq!(taken.as_int(), 9);
            let o = release1(p, Block::field(p, 1), &mut ctx);
            assert!(!o.is_null());
            assert_eq!(ctx.heap.counters().live_blocks, 1, "only the orphan storage remains");
            discard(o, &mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0);

            // shared path: the block keeps its field, nothing double-dropped
            let child2 = Block::alloc(&mut ctx.heap, size_of_block(0, 0), 0, Tag(23));
            let p2 = pair(&mut ctx, BoxVal::from_int(9), BoxVal::from_ptr(child2 as *mut u8));
            dup_block(p2);
            let o2 = release1(p2, Block::field(p2, 1), &mut ctx);
            assert!(o2.is_null());
            assert_eq!(ctx.heap.counters().live_blocks, 2);
            drop_block(p2, &mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_large_shape_reuse_rewrites_the_count_word() {
        let mut ctx = Context::new();
        unsafe {
            let n = 300usize;
            let b = Block::alloc_large(&mut ctx.heap, size_of_block(1 + n, 0), n, Tag::VECTOR);
            for i in 0..n {
                Block::set_field(b, i, BoxVal::from_int(i as i64));
            }
            let o = release0(b, &mut ctx);
            assert!(!o.is_null());

            let q = alloc_reuse(o, size_of_block(1 + n, 0), n, Tag(27), &mut ctx);
            assert_eq!(q, b);
            assert_eq!((*q).header().scan_fsize(), tern_core::SCAN_MAX);
            assert_eq!(Block::scan_count(q), n);
            for i in 0..n {
                Block::set_field(q, i, BoxVal::UNIT);
            }
            drop_block(q, &mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_discard_null_orphan_is_noop() {
        let mut ctx = Context::new();
        unsafe {
            discard(Orphan::NULL, &mut ctx);
        }
        assert_eq!(ctx.heap.counters().blocks_freed, 0);
    }

    #[test]
    fn test_dropping_an_unused_orphan_frees_cleanly() {
        let mut ctx = Context::new();
        unsafe {
            let p = pair(&mut ctx, BoxVal::from_int(1), BoxVal::from_int(2));
            let o = release0(p, &mut ctx);
            assert!(!o.is_null());
            // a zeroed header makes a plain drop terminal: rc 0, scan 0
            drop_boxed(BoxVal::from_ptr(p as *mut u8), &mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }

    #[test]
    fn test_reuse_after_release1_keeps_counts_balanced() {
        let mut ctx = Context::new();
        unsafe {
            let kept = Block::alloc(&mut ctx.heap, size_of_block(0, 0), 0, Tag(24));
            let unused = Block::alloc(&mut ctx.heap, size_of_block(0, 0), 0, Tag(25));
            let p = pair(
                &mut ctx,
                BoxVal::from_ptr(kept as *mut u8),
                BoxVal::from_ptr(unused as *mut u8),
            );
            // take field 0, leave field 1 behind
            let taken = Block::field(p, 0);
            let o = release1(p, Block::field(p, 1), &mut ctx);
            let q = alloc_reuse(o, size_of_block(2, 0), 2, Tag(26), &mut ctx);
            Block::set_field(q, 0, taken);
            Block::set_field(q, 1, BoxVal::from_int(0));
            assert_eq!(ctx.heap.counters().live_blocks, 2, "kept child plus rebuilt block");
            drop_block(q, &mut ctx);
            assert_eq!(ctx.heap.counters().live_blocks, 0);
        }
    }
}
