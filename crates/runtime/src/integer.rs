//! Opaque integers
//!
//! Runtime integers are fixnums until they outgrow the 62-bit direct range,
//! then they become BIGINT blocks owned by an external arbitrary-precision
//! collaborator. This runtime never looks inside one: the collaborator
//! registers its operations once at startup and everything past the fixnum
//! fast path routes through them. Running into a big integer with no
//! collaborator installed is fatal; nothing else could have produced it.

use std::sync::OnceLock;

use tern_core::{BoxVal, MAX_FIXNUM, fatal_error};

use crate::context::Context;

/// Operations supplied by the arbitrary-precision collaborator.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BigintOps {
    /// Increment, consuming the argument. Receives fixnums too: the
    /// overflow promotion from direct to big happens here.
    pub inc: unsafe extern "C" fn(BoxVal, *mut Context) -> BoxVal,
    /// Add one owner.
    pub dup: unsafe extern "C" fn(BoxVal) -> BoxVal,
    /// Remove one owner, freeing on last release.
    pub free: unsafe extern "C" fn(BoxVal, *mut Context),
}

static BIGINT_OPS: OnceLock<BigintOps> = OnceLock::new();

/// Register the collaborator. Only the first registration wins; returns
/// whether this call installed the operations.
pub fn install_bigint_ops(ops: BigintOps) -> bool {
    BIGINT_OPS.set(ops).is_ok()
}

fn bigint_ops(op: &str) -> &'static BigintOps {
    match BIGINT_OPS.get() {
        Some(ops) => ops,
        None => fatal_error!(
            libc::ENOSYS,
            "integer {} outside the fixnum range, but no big-integer support is linked",
            op
        ),
    }
}

/// An integer from a value inside the fixnum range.
#[inline]
pub fn integer_from_small(i: i64) -> BoxVal {
    BoxVal::from_int(i)
}

/// Increment an integer, consuming the argument.
///
/// # Safety
/// `v` must be a fixnum or an owned big integer.
pub unsafe fn integer_inc(v: BoxVal, ctx: &mut Context) -> BoxVal {
    if v.is_fixnum() {
        let i = v.as_int();
        if i < MAX_FIXNUM {
            BoxVal::from_int(i + 1)
        } else {
            // promotion to big happens in the collaborator
            unsafe { (bigint_ops("increment").inc)(v, ctx as *mut Context) }
        }
    } else {
        unsafe { (bigint_ops("increment").inc)(v, ctx as *mut Context) }
    }
}

/// Add an owner to an integer. Fixnums pass through.
///
/// # Safety
/// `v` must be a fixnum or a live big integer.
#[inline]
pub unsafe fn integer_dup(v: BoxVal) -> BoxVal {
    if v.is_fixnum() {
        v
    } else {
        unsafe { (bigint_ops("duplicate").dup)(v) }
    }
}

/// Remove an owner from an integer. Fixnums pass through.
///
/// # Safety
/// `v` must be a fixnum or an owned big integer; `ctx` must be the calling
/// thread's context.
#[inline]
pub unsafe fn integer_free(v: BoxVal, ctx: &mut Context) {
    if !v.is_fixnum() {
        unsafe { (bigint_ops("free").free)(v, ctx as *mut Context) };
    }
}

/// Register the big-integer collaborator; first registration wins.
#[unsafe(no_mangle)]
pub extern "C" fn tern_install_bigint_ops(ops: BigintOps) -> bool {
    install_bigint_ops(ops)
}

/// Increment an integer, consuming the argument.
///
/// # Safety
/// `v` must be a fixnum or an owned big integer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_integer_inc(v: BoxVal, ctx: *mut Context) -> BoxVal {
    unsafe { integer_inc(v, &mut *ctx) }
}

/// Add an owner to an integer.
///
/// # Safety
/// `v` must be a fixnum or a live big integer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_integer_dup(v: BoxVal) -> BoxVal {
    unsafe { integer_dup(v) }
}

/// Remove an owner from an integer.
///
/// # Safety
/// `v` must be a fixnum or an owned big integer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_integer_free(v: BoxVal, ctx: *mut Context) {
    unsafe { integer_free(v, &mut *ctx) }
}
