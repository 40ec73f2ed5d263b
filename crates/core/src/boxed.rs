//! Box-Word Encoding
//!
//! Encodes every runtime value into one 64-bit machine word: either a pointer
//! to a heap block or a tagged direct value. The low two bits discriminate,
//! chosen so no 8-byte-aligned block pointer can collide with a direct value:
//!
//! ```text
//! Block pointer:  PPPP_PPPP ... PPPP_PP00   (8-aligned, never null)
//! Fixnum:         IIII_IIII ... IIII_II01   (62-bit signed, arithmetic shift)
//! Direct scalar:  UUUU_UUUU ... UUUU_UU11   (62-bit unsigned "enum" payload)
//! Null sentinel:  0000_0000 ... 0000_0010   (produced by no constructor)
//! ```
//!
//! The pointer test is a single two-bit compare, which is what lets dup/drop
//! skip refcount work on direct values without a table or a second branch.
//! Fixnums share the word with big-integer block pointers: a small integer
//! carries the `0b01` pattern, a big integer is an ordinary block pointer.
//!
//! Direct scalars cover unit, constructor value-tags, lengths, and C function
//! pointers (shifted addresses): anything a field scan must skip.
//!
//! Round-trips are exact for values produced by the corresponding
//! constructor. Feeding a misaligned pointer is undefined behavior, checked
//! only by `debug_assert!`.

// =============================================================================
// Constants
// =============================================================================

/// Mask for the two discriminant bits.
pub const KIND_MASK: usize = 0b11;

/// Low-bit pattern of a block pointer (alignment supplies the zeros).
pub const KIND_PTR: usize = 0b00;

/// Low-bit pattern of a small (fixnum) integer.
pub const KIND_INT: usize = 0b01;

/// Low-bit pattern of a direct unsigned scalar.
pub const KIND_VALUE: usize = 0b11;

/// Payload shift for direct values.
pub const KIND_SHIFT: u32 = 2;

/// Largest fixnum: 2^61 - 1.
pub const MAX_FIXNUM: i64 = (1i64 << 61) - 1;

/// Smallest fixnum: -2^61.
pub const MIN_FIXNUM: i64 = -(1i64 << 61);

/// Largest direct unsigned payload.
pub const MAX_DIRECT: usize = usize::MAX >> KIND_SHIFT;

// =============================================================================
// BoxVal
// =============================================================================

/// One boxed machine word: a block pointer or a tagged direct value.
///
/// `#[repr(transparent)]` over `usize` so it crosses the C ABI in a register
/// and can live verbatim in block payloads.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxVal(usize);

impl BoxVal {
    /// The absent-value sentinel. Produced by no constructor; its `0b10`
    /// pattern fails every kind test, so a stray dup/drop on it is a no-op.
    pub const NULL: BoxVal = BoxVal(0b10);

    /// The boxed unit value (direct scalar 0).
    pub const UNIT: BoxVal = BoxVal(KIND_VALUE);

    // -------------------------------------------------------------------------
    // Constructors
    // -------------------------------------------------------------------------

    /// Box an 8-aligned block pointer as itself.
    ///
    /// # Safety contract
    /// `p` must be non-null and 8-aligned; violating that is UB downstream,
    /// not a checked error.
    #[inline(always)]
    pub fn from_ptr(p: *mut u8) -> BoxVal {
        debug_assert!(!p.is_null(), "from_ptr: null block pointer");
        debug_assert!(p as usize & KIND_MASK == 0, "from_ptr: misaligned block pointer");
        BoxVal(p as usize)
    }

    /// Box a small signed integer.
    #[inline(always)]
    pub fn from_int(i: i64) -> BoxVal {
        debug_assert!((MIN_FIXNUM..=MAX_FIXNUM).contains(&i), "from_int: {} out of fixnum range", i);
        BoxVal(((i << KIND_SHIFT) as usize) | KIND_INT)
    }

    /// Box a direct unsigned scalar (unit, value tags, lengths).
    #[inline(always)]
    pub fn from_enum(u: usize) -> BoxVal {
        debug_assert!(u <= MAX_DIRECT, "from_enum: {} out of direct range", u);
        BoxVal((u << KIND_SHIFT) | KIND_VALUE)
    }

    /// Box a C pointer (function address, foreign data) as a direct scalar so
    /// field scans skip it. Unlike `from_ptr` there is no alignment demand.
    #[inline(always)]
    pub fn from_cptr(p: *const u8) -> BoxVal {
        BoxVal::from_enum(p as usize)
    }

    /// Reconstitute from a raw word (FFI boundary / stored payloads).
    #[inline(always)]
    pub const fn from_raw(w: usize) -> BoxVal {
        BoxVal(w)
    }

    // -------------------------------------------------------------------------
    // Kind tests
    // -------------------------------------------------------------------------

    /// Does this word hold a block pointer? The hot two-bit test.
    #[inline(always)]
    pub const fn is_ptr(self) -> bool {
        self.0 & KIND_MASK == KIND_PTR
    }

    /// Fixnum or direct scalar (anything refcounting must skip).
    #[inline(always)]
    pub const fn is_direct(self) -> bool {
        self.0 & KIND_MASK != KIND_PTR
    }

    #[inline(always)]
    pub const fn is_fixnum(self) -> bool {
        self.0 & KIND_MASK == KIND_INT
    }

    #[inline(always)]
    pub const fn is_enum(self) -> bool {
        self.0 & KIND_MASK == KIND_VALUE
    }

    #[inline(always)]
    pub const fn is_null(self) -> bool {
        self.0 == BoxVal::NULL.0
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Unbox a block pointer.
    #[inline(always)]
    pub fn as_ptr(self) -> *mut u8 {
        debug_assert!(self.is_ptr(), "as_ptr: word 0x{:016x} is not a pointer", self.0);
        self.0 as *mut u8
    }

    /// Unbox a fixnum (arithmetic shift restores the sign).
    #[inline(always)]
    pub fn as_int(self) -> i64 {
        debug_assert!(self.is_fixnum(), "as_int: word 0x{:016x} is not a fixnum", self.0);
        (self.0 as i64) >> KIND_SHIFT
    }

    /// Unbox a direct unsigned scalar.
    #[inline(always)]
    pub fn as_enum(self) -> usize {
        debug_assert!(self.is_enum(), "as_enum: word 0x{:016x} is not a direct value", self.0);
        self.0 >> KIND_SHIFT
    }

    /// Unbox a C pointer boxed with `from_cptr`.
    #[inline(always)]
    pub fn as_cptr(self) -> *mut u8 {
        self.as_enum() as *mut u8
    }

    /// The raw word.
    #[inline(always)]
    pub const fn raw(self) -> usize {
        self.0
    }
}

// =============================================================================
// Tests
// =============================================================================
