//! Cranelift-based x86 back-end: turns one basic block's finalized IR into
//! a [`Block`] of callable native code, backed by a watermarked executable
//! arena.
//!
//! Grounded on the source's `ppcjit` crate: `Compiler`/`JIT` keep the same
//! names and the same overall `compile()` pipeline shape (build an
//! `ir::Function`, run a builder pass over it, hand the function to
//! `codegen::Context::compile`, allocate the result into an executable
//! arena), adapted to lower pre-built [`ppc_ir::IrNode`]s instead of raw
//! PowerPC instructions.

mod block;
mod compiler;
mod context_layout;
mod error;
mod hooks;
mod lower;

pub use block::{Block, BlockFn, Meta};
pub use compiler::Settings;
pub use error::BuildError;
pub use hooks::{Fault, Hooks};

use cranelift::codegen;
use cranelift::frontend::{FunctionBuilder, FunctionBuilderContext};
use jit_arena::{Arena, Exec};
use ppc_ir::IrNode;
use ppc_interp::MemoryMap;

use compiler::Compiler;
use lower::Lowering;

/// Code-cache sizing: total mapping size and a trailing guard slack that
/// [`Arena::grab`] refuses to allocate into. Mirrors the two knobs the
/// source's code-cache arena exposes.
#[derive(Debug, Clone, Copy)]
pub struct CodeCacheConfig {
    pub size: usize,
    pub guard: usize,
}

impl Default for CodeCacheConfig {
    fn default() -> Self {
        Self { size: 16 * 1024 * 1024, guard: 4096 }
    }
}

/// Alignment native code is placed at; generous enough for any ISA's
/// instruction-fetch alignment preference without having to ask Cranelift.
const CODE_ALIGNMENT: usize = 16;

/// Owns the Cranelift compilation pipeline and the executable code cache
/// every compiled [`Block`] is carved from. One `Jit` is created per
/// `ppc-core` engine and reused across every block it ever compiles —
/// Cranelift's ISA/settings setup is not cheap enough to redo per block.
pub struct Jit {
    compiler: Compiler,
    code_ctx: codegen::Context,
    func_ctx: FunctionBuilderContext,
    code: Arena<Exec>,
    compiled_count: u64,
}

impl Jit {
    pub fn new(settings: Settings, cache: CodeCacheConfig) -> Result<Self, BuildError> {
        Ok(Self {
            compiler: Compiler::new(settings),
            code_ctx: codegen::Context::new(),
            func_ctx: FunctionBuilderContext::new(),
            code: Arena::new(cache.size, cache.guard)?,
            compiled_count: 0,
        })
    }

    /// Number of blocks successfully compiled since construction (or since
    /// the code arena was last reset); surfaced for tracing/metrics, not
    /// consulted by any control-flow decision here.
    pub fn compiled_count(&self) -> u64 {
        self.compiled_count
    }

    /// Reclaims the entire code cache. Every [`Block`] handed out before
    /// this call becomes dangling — the caller (the BB directory) must
    /// drop every `Block` it holds before calling this.
    pub fn reset_cache(&mut self) {
        self.code.reset();
    }

    /// Lowers `nodes` (a finished, DCE'd basic block) against `map` into a
    /// callable [`Block`] charged `cycles` source cycles per invocation.
    ///
    /// Fails with [`BuildError::EmptyBlock`] if every node folded away to
    /// nothing with no must-emit side effect (see [`ppc_ir::IrOp::must_emit`]),
    /// which can happen for a block whose only content was, say, a dead
    /// `cmp` whose result was never read before the next write.
    pub fn compile(&mut self, nodes: &[IrNode], map: &MemoryMap, cycles: u32) -> Result<Block, BuildError> {
        if !nodes.iter().any(|n| n.must_emit) {
            return Err(BuildError::EmptyBlock);
        }

        let sig = self.compiler.block_signature();
        let mut func = codegen::ir::Function::with_name_signature(codegen::ir::UserFuncName::user(0, self.compiled_count as u32), sig);

        {
            let mut bd = FunctionBuilder::new(&mut func, &mut self.func_ctx);
            let entry = bd.create_block();
            bd.append_block_params_for_function_params(entry);
            bd.switch_to_block(entry);
            bd.seal_block(entry);

            let ctx_ptr = bd.block_params(entry)[0];
            let hooks_ptr = bd.block_params(entry)[1];
            let ptr_type = self.compiler.isa.pointer_type();

            let lowering = Lowering::new(&mut bd, ptr_type, ctx_ptr, hooks_ptr, map);
            lowering.finish(nodes)?;

            bd.finalize();
        }

        let clif = if cfg!(debug_assertions) { Some(func.display().to_string()) } else { None };

        self.code_ctx.clear();
        self.code_ctx.func = func;
        self.code_ctx.compile(&*self.compiler.isa, &mut Default::default())?;

        let compiled = self.code_ctx.compiled_code().expect("compile() succeeded");
        let code = self.code.grab_with(CODE_ALIGNMENT, compiled.code_buffer())?;

        self.compiled_count += 1;
        Ok(Block::new(code, Meta { cycles, clif }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppc_arch::registers::GPR;
    use ppc_arch::DFlowReg;
    use ppc_interp::{MemoryMapConfig, MemoryRegion};
    use ppc_ir::Builder;

    fn empty_map() -> MemoryMap {
        let range = ppc_interp::Range { start: 0, end: 0x1000 };
        let mut buf = [0u8; 0x1000];
        let buf: &'static mut [u8] = Box::leak(Box::new(buf));
        MemoryMap::new(MemoryMapConfig {
            fetch: vec![MemoryRegion::buffer(range, buf, true, false)],
            read8: vec![MemoryRegion::buffer(range, buf, true, false)],
            read16: vec![MemoryRegion::buffer(range, buf, true, false)],
            read32: vec![MemoryRegion::buffer(range, buf, true, false)],
            write8: vec![MemoryRegion::buffer(range, buf, true, false)],
            write16: vec![MemoryRegion::buffer(range, buf, true, false)],
            write32: vec![MemoryRegion::buffer(range, buf, true, false)],
        })
        .unwrap()
    }

    /// A block with no must-emit node (everything folded to a pure
    /// register move with a dead destination) is rejected before Cranelift
    /// ever sees it.
    #[test]
    fn empty_block_is_rejected() {
        let mut builder = Builder::new();
        builder.begin_block();
        let nodes = builder.end_block();

        let mut jit = Jit::new(Settings::default(), CodeCacheConfig::default()).unwrap();
        let map = empty_map();
        assert!(matches!(jit.compile(&nodes, &map, 1), Err(BuildError::EmptyBlock)));
    }

    /// A minimal real block (load an immediate into a GPR, then branch to a
    /// constant target) compiles to a non-empty callable block.
    #[test]
    fn simple_block_compiles() {
        let mut builder = Builder::new();
        builder.begin_block();
        builder.loadi(DFlowReg::Gpr(GPR::R3), 42);
        builder.store32(DFlowReg::Gpr(GPR::R3).into(), ppc_ir::Operand::Imm(0x100));
        builder.branch(ppc_ir::Operand::Imm(0x1000));
        let nodes = builder.end_block();

        let mut jit = Jit::new(Settings::default(), CodeCacheConfig::default()).unwrap();
        let map = empty_map();
        let block = jit.compile(&nodes, &map, 4).unwrap();
        assert_eq!(block.meta.cycles, 4);
    }
}
