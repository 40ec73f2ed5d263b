//! Block tags
//!
//! A `Tag` classifies a block's representation. User-defined constructor tags
//! occupy `1..=65000`; the runtime's own representations sit above that. The
//! raw tags form a contiguous suffix so "carries a foreign free-function"
//! is one comparison.

use crate::boxed::BoxVal;

/// A block's representation tag. Stored as the u16 header field.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tag(pub u16);

impl Tag {
    /// Tag of a zeroed (orphaned) header; never a live block.
    pub const INVALID: Tag = Tag(0);

    /// First user constructor tag.
    pub const MIN: Tag = Tag(1);
    /// Last user constructor tag.
    pub const MAX: Tag = Tag(65000);

    /// Open datatype; first field is a string tag.
    pub const OPEN: Tag = Tag(65001);
    /// Boxed value type.
    pub const BOXED: Tag = Tag(65002);
    /// Mutable reference cell.
    pub const REF: Tag = Tag(65003);
    /// Function closure; first field is the C code pointer, rest free variables.
    pub const FUNCTION: Tag = Tag(65004);
    /// Arbitrary-precision integer (external collaborator).
    pub const BIGINT: Tag = Tag(65005);
    /// In-place UTF-8 string of at most 7 bytes.
    pub const STRING_SMALL: Tag = Tag(65006);
    /// In-place UTF-8 string.
    pub const STRING: Tag = Tag(65007);
    /// In-place byte vector.
    pub const BYTES: Tag = Tag(65008);
    /// Vector of boxed values, length < 255.
    pub const VECTOR_SMALL: Tag = Tag(65009);
    /// Vector of boxed values, large variant.
    pub const VECTOR: Tag = Tag(65010);
    /// Evidence-vector entry: marker plus handler state.
    pub const EVIDENCE: Tag = Tag(65011);
    /// Boxed i64 outside the fixnum range.
    pub const INT64: Tag = Tag(65012);
    /// Boxed IEEE double.
    pub const DOUBLE: Tag = Tag(65013);

    // Raw tags wrap a foreign pointer plus free-function. CPTR_RAW must stay
    // first: `is_raw` relies on the contiguous suffix.
    /// Foreign `void*` with free function.
    pub const CPTR_RAW: Tag = Tag(65014);
    /// Foreign pointer to a valid UTF-8 string.
    pub const STRING_RAW: Tag = Tag(65015);
    /// Foreign pointer to bytes.
    pub const BYTES_RAW: Tag = Tag(65016);

    /// One past the last valid tag.
    pub const LAST: Tag = Tag(65017);

    /// Does this tag carry a foreign free-function payload?
    #[inline(always)]
    pub const fn is_raw(self) -> bool {
        self.0 >= Tag::CPTR_RAW.0
    }

    /// Is this a user constructor tag?
    #[inline(always)]
    pub const fn is_user(self) -> bool {
        self.0 >= Tag::MIN.0 && self.0 <= Tag::MAX.0
    }

    /// The boxed form of a value-type constructor tag: `(tag << 2) | 0b11`.
    #[inline(always)]
    pub fn value_tag(self) -> BoxVal {
        BoxVal::from_enum(self.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_suffix_is_contiguous() {
        assert!(Tag::CPTR_RAW.is_raw());
        assert!(Tag::STRING_RAW.is_raw());
        assert!(Tag::BYTES_RAW.is_raw());
        assert_eq!(Tag::STRING_RAW.0, Tag::CPTR_RAW.0 + 1);
        assert_eq!(Tag::BYTES_RAW.0, Tag::STRING_RAW.0 + 1);
        assert_eq!(Tag::LAST.0, Tag::BYTES_RAW.0 + 1);
    }

    #[test]
    fn test_non_raw_tags() {
        for t in [
            Tag::INVALID,
            Tag::MIN,
            Tag::MAX,
            Tag::OPEN,
            Tag::REF,
            Tag::FUNCTION,
            Tag::VECTOR,
            Tag::EVIDENCE,
            Tag::DOUBLE,
        ] {
            assert!(!t.is_raw(), "{:?} wrongly reads as raw", t);
        }
    }

    #[test]
    fn test_user_range() {
        assert!(Tag::MIN.is_user());
        assert!(Tag(4242).is_user());
        assert!(Tag::MAX.is_user());
        assert!(!Tag::INVALID.is_user());
        assert!(!Tag::OPEN.is_user());
    }

    #[test]
    fn test_runtime_tags_follow_user_range() {
        assert_eq!(Tag::OPEN.0, Tag::MAX.0 + 1);
    }

    #[test]
    fn test_value_tag_encoding() {
        let vt = Tag(7).value_tag();
        assert!(vt.is_enum());
        assert_eq!(vt.as_enum(), 7);
        assert_eq!(vt.raw(), (7 << 2) | 0b11);
    }
}
