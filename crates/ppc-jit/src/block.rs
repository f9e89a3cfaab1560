//! A compiled, callable native block.
//!
//! Grounded on the source's `block.rs`, with the native call surface
//! narrowed to a single pointer pair (no `Trampoline` indirection — the
//! engine invokes a block's function pointer directly, since nothing here
//! needs the source's inter-block tail-linking).

use jit_arena::{Allocation, Exec};
use ppc_interp::Context;

use crate::hooks::Hooks;

/// The exact ABI a compiled block presents: the architectural context and
/// the hook table, both raw pointers because Cranelift's `call_indirect`
/// only speaks pointer-sized integers.
pub type BlockFn = extern "C" fn(*mut Context, *const Hooks);

/// Diagnostics captured alongside a block's machine code; not consulted by
/// [`Block::call`], only by tracing and tests.
#[derive(Debug, Clone)]
pub struct Meta {
    /// Source cycle count charged once per invocation via the `Sync` hook.
    pub cycles: u32,
    /// Disassembled Cranelift IR text, kept only in debug builds.
    pub clif: Option<String>,
}

/// A finished translation, backed by a slice of the shared code-cache
/// arena. Dropping a `Block` does not reclaim its bytes — the cache is
/// reclaimed wholesale on overflow (see `Engine`'s cache-overflow recovery).
pub struct Block {
    code: Allocation<Exec>,
    pub meta: Meta,
}

impl Block {
    pub(crate) fn new(code: Allocation<Exec>, meta: Meta) -> Self {
        Self { code, meta }
    }

    /// Runs this block's native code against `ctx` and `hooks`.
    ///
    /// # Safety
    /// `ctx` must be a valid, exclusively-owned `Context` and `hooks` must
    /// point at a `Hooks` whose `map`/`fault` pointers are valid for the
    /// duration of the call. The caller must not have mutated the
    /// code-cache arena (via `reset`) since this block was compiled.
    pub unsafe fn call(&self, ctx: *mut Context, hooks: *const Hooks) {
        let entry: BlockFn = unsafe { std::mem::transmute(self.code.as_ptr()) };
        entry(ctx, hooks);
    }
}
