//! Block headers
//!
//! Every heap block starts with this 64-bit header. The refcount is 32-bit
//! even on 64-bit targets and encodes ownership as bands readable with one
//! signed compare:
//!
//! ```text
//! 0x0000_0000              unique (exactly one owner)
//! 0x0000_0001..0x7FFF_FFFF shared: stored value is owners - 1
//! 0x8000_0000..0xBFFF_FFFF thread-shared: atomic adjustments, reads negative
//! 0xC000_0000..0xFFFF_FFFF sticky: pinned, never adjusted, never freed
//! ```
//!
//! "0 means unique" makes the hot uniqueness test a single zero compare, and
//! putting thread-shared and sticky in the sign-bit range lets dup/drop
//! divert to their slow paths off one `(rc as i32) < 0` test.
//!
//! The field is an `AtomicU32` so the same storage serves both modes: plain
//! mode uses relaxed load/store (compiling to ordinary moves), thread-shared
//! mode uses fetch_add/fetch_sub. `scan_fsize` saturates at the 0xFF
//! sentinel; the true count then lives in a boxed word after the header.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::tag::Tag;

/// Refcount floor of the thread-shared band (the sign bit).
pub const RC_SHARED: u32 = 0x8000_0000;

/// Refcount floor of the sticky band: pinned here, the block leaks by design.
pub const RC_STICKY: u32 = 0xC000_0000;

/// Scan-field sentinel: the true count is a boxed word after the header.
pub const SCAN_MAX: u8 = 0xFF;

/// Header flag: block has been promoted to thread-shared.
pub const FLAG_THREAD_SHARED: u8 = 0x01;

/// The universal block header: refcount, tag, scan-field count, flags.
#[repr(C)]
#[derive(Debug)]
pub struct Header {
    refcount: AtomicU32,
    tag: u16,
    scan_fsize: u8,
    flags: u8,
}

impl Header {
    /// Fresh header: unique refcount, no flags.
    #[inline]
    pub fn new(tag: Tag, scan_fsize: u8) -> Header {
        Header {
            refcount: AtomicU32::new(0),
            tag: tag.0,
            scan_fsize,
            flags: 0,
        }
    }

    /// Header for statically-allocated singletons: refcount pinned in the
    /// sticky band so dup/drop are no-ops and the block is never freed.
    #[inline]
    pub const fn new_static(tag: Tag, scan_fsize: u8) -> Header {
        Header {
            refcount: AtomicU32::new(RC_STICKY),
            tag: tag.0,
            scan_fsize,
            flags: 0,
        }
    }

    #[inline(always)]
    pub fn tag(&self) -> Tag {
        Tag(self.tag)
    }

    /// The raw scan-field byte; `SCAN_MAX` means the large variant.
    #[inline(always)]
    pub fn scan_fsize(&self) -> u8 {
        self.scan_fsize
    }

    /// The shared refcount word. Policy (bands, orderings) lives with the
    /// lifecycle code; the header only provides the storage.
    #[inline(always)]
    pub fn refcount(&self) -> &AtomicU32 {
        &self.refcount
    }

    /// Relaxed refcount read, for tests and statistics.
    #[inline(always)]
    pub fn load_refcount(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }

    /// The single-compare uniqueness test: stored refcount is zero.
    #[inline(always)]
    pub fn is_unique(&self) -> bool {
        self.refcount.load(Ordering::Relaxed) == 0
    }

    #[inline(always)]
    pub fn is_thread_shared(&self) -> bool {
        self.flags & FLAG_THREAD_SHARED != 0
    }

    /// Record promotion. Caller must still have exclusive access; promotion
    /// happens before the block is handed to another thread.
    #[inline]
    pub fn set_thread_shared(&mut self) {
        self.flags |= FLAG_THREAD_SHARED;
    }

    /// Zero the whole header (orphaning): tag Invalid, unique, scan 0, no
    /// flags. A stray drop on the result is a harmless unique free.
    #[inline]
    pub fn zero(&mut self) {
        *self = Header {
            refcount: AtomicU32::new(0),
            tag: Tag::INVALID.0,
            scan_fsize: 0,
            flags: 0,
        };
    }

    /// Re-initialize in place (orphan reuse): fresh unique header, new shape.
    #[inline]
    pub fn reinit(&mut self, tag: Tag, scan_fsize: u8) {
        *self = Header::new(tag, scan_fsize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_one_word() {
        assert_eq!(std::mem::size_of::<Header>(), 8);
        assert_eq!(std::mem::align_of::<Header>(), 4);
    }

    #[test]
    fn test_new_header_is_unique() {
        let h = Header::new(Tag::REF, 1);
        assert!(h.is_unique());
        assert_eq!(h.load_refcount(), 0);
        assert_eq!(h.tag(), Tag::REF);
        assert_eq!(h.scan_fsize(), 1);
        assert!(!h.is_thread_shared());
    }

    #[test]
    fn test_static_header_is_pinned() {
        let h = Header::new_static(Tag::FUNCTION, 0);
        assert!(!h.is_unique());
        assert_eq!(h.load_refcount(), RC_STICKY);
        // sticky band reads negative
        assert!((h.load_refcount() as i32) < 0);
    }

    #[test]
    fn test_bands_read_as_signed() {
        assert!((0u32 as i32) >= 0);
        assert!(((RC_SHARED - 1) as i32) > 0);
        assert!((RC_SHARED as i32) < 0);
        assert!((RC_STICKY as i32) < 0);
    }

    #[test]
    fn test_zero_clears_everything() {
        let mut h = Header::new(Tag::VECTOR, SCAN_MAX);
        h.refcount().store(17, Ordering::Relaxed);
        h.set_thread_shared();
        h.zero();
        assert!(h.is_unique());
        assert_eq!(h.tag(), Tag::INVALID);
        assert_eq!(h.scan_fsize(), 0);
        assert!(!h.is_thread_shared());
    }

    #[test]
    fn test_reinit_gives_fresh_shape() {
        let mut h = Header::new(Tag::REF, 1);
        h.refcount().store(5, Ordering::Relaxed);
        h.reinit(Tag::FUNCTION, 3);
        assert!(h.is_unique());
        assert_eq!(h.tag(), Tag::FUNCTION);
        assert_eq!(h.scan_fsize(), 3);
    }
}
