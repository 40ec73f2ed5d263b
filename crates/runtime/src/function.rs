//! Function values
//!
//! A function block stores its C code pointer in the first payload word and
//! its captured free variables after it:
//!
//! ```text
//!   +----------+
//!   | header   | tag FUNCTION, scan = 1 + captures
//!   +----------+
//!   | code ptr | boxed as a direct word, so field scans skip it
//!   | capture 0|
//!   | ...      |
//!   +----------+
//! ```
//!
//! Calling convention: `code(self, arg, ctx)`. The callee owns `self` and
//! must release it (or reuse it) before returning; the caller owns `arg` out
//! and the result in. Multi-argument functions take a tuple or curry;
//! the unwind protocol only ever needs the unary shape.

use std::sync::OnceLock;

use tern_core::{BoxVal, Tag, fatal_error};

use crate::block::{Block, size_of_block};
use crate::context::Context;
use crate::refcount::{drop_block, dup_boxed};

/// Code signature of every function value: `(self, argument, context)`.
pub type FunPtr = unsafe extern "C" fn(*mut Block, BoxVal, *mut Context) -> BoxVal;

/// Allocate a function block capturing `free_vars`. Ownership of each
/// capture moves into the block.
pub unsafe fn function_alloc(ctx: &mut Context, code: FunPtr, free_vars: &[BoxVal]) -> *mut Block {
    let words = 1 + free_vars.len();
    let f = Block::alloc(&mut ctx.heap, size_of_block(words, 0), words, Tag::FUNCTION);
    unsafe {
        Block::words(f).write(BoxVal::from_cptr(code as usize as *const u8));
        for (i, v) in free_vars.iter().enumerate() {
            Block::words(f).add(1 + i).write(*v);
        }
    }
    f
}

/// Invoke a function value. Consumes the caller's reference to `f` (the
/// callee releases it) and the caller's reference to `arg`.
///
/// # Safety
/// `f` must be a live function block owned by the caller; `ctx` must be the
/// calling thread's context.
#[inline]
pub unsafe fn function_call(f: *mut Block, arg: BoxVal, ctx: *mut Context) -> BoxVal {
    debug_assert_eq!(unsafe { (*f).header().tag() }, Tag::FUNCTION, "function_call: not a function block");
    let code: FunPtr = unsafe { std::mem::transmute(Block::words(f).read().as_cptr()) };
    unsafe { code(f, arg, ctx) }
}

/// Read capture `i` without adjusting counts. For a capture the callee keeps
/// past its own return, use `function_dup_field`.
///
/// # Safety
/// `f` must be a live function block with more than `i` captures.
#[inline]
pub unsafe fn function_field(f: *mut Block, i: usize) -> BoxVal {
    unsafe { Block::field(f, 1 + i) }
}

/// Read capture `i` with an owner added.
///
/// # Safety
/// `f` must be a live function block with more than `i` captures.
#[inline]
pub unsafe fn function_dup_field(f: *mut Block, i: usize) -> BoxVal {
    unsafe { dup_boxed(function_field(f, i)) }
}

unsafe extern "C" fn identity_code(f: *mut Block, arg: BoxVal, ctx: *mut Context) -> BoxVal {
    // pinned singleton, so this drop is a no-op; the convention still holds
    unsafe { drop_block(f, &mut *ctx) };
    arg
}

struct PinnedBlock(*mut Block);
// the singleton is pinned and immutable after init, so handing the pointer
// across threads is sound
unsafe impl Send for PinnedBlock {}
unsafe impl Sync for PinnedBlock {}

static FUNCTION_ID: OnceLock<PinnedBlock> = OnceLock::new();

/// The identity function value. Process-wide, pinned, never freed; `dup`
/// and `drop` on it are no-ops, so it is safe to hand out repeatedly (the
/// unwind protocol returns it as the trivial continuation).
pub fn function_id() -> *mut Block {
    FUNCTION_ID
        .get_or_init(|| {
            // one allocation for the process; bypasses per-thread counters
            let b = unsafe { libc::malloc(size_of_block(1, 0)) } as *mut Block;
            if b.is_null() {
                fatal_error!(libc::ENOMEM, "identity function allocation failed");
            }
            unsafe {
                Block::init_static(b, Tag::FUNCTION, 1);
                Block::words(b).write(BoxVal::from_cptr(identity_code as usize as *const u8));
            }
            PinnedBlock(b)
        })
        .0
}

/// Invoke a boxed function value with `arg`.
///
/// # Safety
/// `f` must box a live function block owned by the caller; `ctx` must be the
/// calling thread's context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_function_call(f: BoxVal, arg: BoxVal, ctx: *mut Context) -> BoxVal {
    unsafe { function_call(f.as_ptr() as *mut Block, arg, ctx) }
}
