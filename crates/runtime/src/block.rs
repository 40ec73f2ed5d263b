//! Heap block model
//!
//! Every heap value is a block: an 8-byte header followed by payload words,
//! with any raw (unscanned) bytes after the scannable prefix.
//!
//! ```text
//!   small (scan count <= 254)        large (scan count >= 255)
//!   +----------+                     +----------+
//!   | header   | scan_fsize = n      | header   | scan_fsize = 0xFF
//!   +----------+                     +----------+
//!   | field 0  |                     | scan box | boxed true field count
//!   | ...      |                     +----------+
//!   | field n-1|                     | field 0  |
//!   +----------+                     | ...      |
//!   | raw bytes|                     +----------+
//!   +----------+                     | raw bytes|
//!                                    +----------+
//! ```
//!
//! The header's inline count covers the common case in one byte; a block
//! whose scannable prefix does not fit carries the sentinel and stores the
//! true count as a boxed word in front of the fields. `scan_count` hides the
//! difference from every consumer.

use tern_core::{BoxVal, Header, SCAN_MAX, Tag};

use crate::context::Context;
use crate::heap::Heap;

/// A heap block. Only the header is a named field; payload words live
/// directly after it in the same allocation and are reached through the raw
/// accessors below.
#[repr(C)]
pub struct Block {
    header: Header,
}

/// Bytes occupied by the header at the front of every block.
pub const HEADER_SIZE: usize = std::mem::size_of::<Header>();
/// Bytes per payload word.
pub const WORD_SIZE: usize = std::mem::size_of::<BoxVal>();

/// Total allocation size for a block of `words` payload words plus
/// `raw_bytes` trailing raw bytes.
#[inline]
pub const fn size_of_block(words: usize, raw_bytes: usize) -> usize {
    HEADER_SIZE + words * WORD_SIZE + raw_bytes
}

impl Block {
    /// Allocate a small-form block: `size` bytes total (header included),
    /// `scan_fsize` scannable fields inline in the header.
    ///
    /// Payload words are not initialized; the caller writes every scan field
    /// before the block can be dropped.
    pub fn alloc(heap: &mut Heap, size: usize, scan_fsize: usize, tag: Tag) -> *mut Block {
        debug_assert!(scan_fsize < SCAN_MAX as usize, "Block::alloc: scan count {} needs the large form", scan_fsize);
        debug_assert!(size >= size_of_block(scan_fsize, 0), "Block::alloc: size {} too small for {} fields", size, scan_fsize);
        let b = heap.alloc_raw(size) as *mut Block;
        unsafe {
            (*b).header = Header::new(tag, scan_fsize as u8);
        }
        b
    }

    /// Allocate a large-form block: the header carries the overflow sentinel
    /// and the true scan-field count is stored boxed in the first payload
    /// word. `size` includes that extra word.
    pub fn alloc_large(heap: &mut Heap, size: usize, scan_fsize: usize, tag: Tag) -> *mut Block {
        debug_assert!(size >= size_of_block(1 + scan_fsize, 0), "Block::alloc_large: size {} too small for {} fields", size, scan_fsize);
        let b = heap.alloc_raw(size) as *mut Block;
        unsafe {
            (*b).header = Header::new(tag, SCAN_MAX);
            Block::words(b).write(BoxVal::from_enum(scan_fsize));
        }
        b
    }

    /// Reallocate a uniquely-owned block to `new_size` bytes. The block may
    /// move; the old pointer is dead after this returns.
    ///
    /// # Safety
    /// `b` must be live, allocated from `heap`, and uniquely owned.
    pub unsafe fn realloc(heap: &mut Heap, b: *mut Block, new_size: usize) -> *mut Block {
        debug_assert!(unsafe { (*b).header().is_unique() }, "Block::realloc: block must be uniquely owned");
        unsafe { heap.realloc_raw(b as *mut u8, new_size) as *mut Block }
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// First payload word. For large blocks this is the boxed scan count,
    /// not a field; use `fields` to skip it.
    ///
    /// # Safety
    /// `b` must point to a live block.
    #[inline]
    pub unsafe fn words(b: *mut Block) -> *mut BoxVal {
        unsafe { (b as *mut u8).add(HEADER_SIZE) as *mut BoxVal }
    }

    /// First scannable field, past the large-form count word when present.
    ///
    /// # Safety
    /// `b` must point to a live block.
    #[inline]
    pub unsafe fn fields(b: *mut Block) -> *mut BoxVal {
        let skip = unsafe { ((*b).header.scan_fsize() == SCAN_MAX) as usize };
        unsafe { Block::words(b).add(skip) }
    }

    /// Number of scannable fields, reading through the sentinel when the
    /// count lives in the first payload word.
    ///
    /// # Safety
    /// `b` must point to a live block.
    #[inline]
    pub unsafe fn scan_count(b: *mut Block) -> usize {
        let sf = unsafe { (*b).header.scan_fsize() };
        if sf == SCAN_MAX {
            unsafe { Block::words(b).read().as_enum() }
        } else {
            sf as usize
        }
    }

    /// Read scan field `i` without adjusting counts.
    ///
    /// # Safety
    /// `b` must point to a live block with more than `i` scan fields.
    #[inline]
    pub unsafe fn field(b: *mut Block, i: usize) -> BoxVal {
        debug_assert!(i < unsafe { Block::scan_count(b) }, "Block::field: index {} out of range", i);
        unsafe { Block::fields(b).add(i).read() }
    }

    /// Write scan field `i` without adjusting counts.
    ///
    /// # Safety
    /// `b` must point to a live block with more than `i` scan fields, and
    /// any previous owner of the slot must already be accounted for.
    #[inline]
    pub unsafe fn set_field(b: *mut Block, i: usize, v: BoxVal) {
        debug_assert!(i < unsafe { Block::scan_count(b) }, "Block::set_field: index {} out of range", i);
        unsafe { Block::fields(b).add(i).write(v) }
    }

    /// Start of the raw byte region after the scan fields.
    ///
    /// # Safety
    /// `b` must point to a live block.
    #[inline]
    pub unsafe fn raw_bytes(b: *mut Block) -> *mut u8 {
        unsafe { Block::fields(b).add(Block::scan_count(b)) as *mut u8 }
    }

    /// Write a pinned header into caller-provided storage. Used for the
    /// process-wide singletons, which live outside any thread's heap and are
    /// never freed.
    ///
    /// # Safety
    /// `b` must point to writable storage of at least header size.
    pub(crate) unsafe fn init_static(b: *mut Block, tag: Tag, scan_fsize: u8) {
        unsafe { (*b).header = Header::new_static(tag, scan_fsize) };
    }
}

/// Allocate a small-form block: `size` bytes total, `scan_fsize` scannable
/// fields. Payload words are uninitialized; the caller writes every scan
/// field before the block can be dropped.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_block_alloc(
    size: usize,
    scan_fsize: usize,
    tag: Tag,
    ctx: *mut Context,
) -> *mut Block {
    Block::alloc(unsafe { &mut (*ctx).heap }, size, scan_fsize, tag)
}

/// Allocate a large-form block; `size` includes the extra count word.
///
/// # Safety
/// `ctx` must be the calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_block_alloc_large(
    size: usize,
    scan_fsize: usize,
    tag: Tag,
    ctx: *mut Context,
) -> *mut Block {
    Block::alloc_large(unsafe { &mut (*ctx).heap }, size, scan_fsize, tag)
}

/// Reallocate a uniquely-owned block to `new_size` bytes; the block may
/// move.
///
/// # Safety
/// `ctx` must be the calling thread's context; `b` must be live, uniquely
/// owned, and allocated by this runtime.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_block_realloc(
    b: *mut Block,
    new_size: usize,
    ctx: *mut Context,
) -> *mut Block {
    unsafe { Block::realloc(&mut (*ctx).heap, b, new_size) }
}
