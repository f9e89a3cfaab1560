//! Lowers one finalized IR node list into a Cranelift `ir::Function` body.
//!
//! Grounded on the source's `builder.rs`/`builder/memory.rs`/`builder/
//! branch.rs`: the same "lazily load a context slot into a Cranelift
//! `Variable` on first read, write back only what was modified" register
//! cache, and the same call-indirect pattern for memory accesses whose
//! address isn't known at translate time — generalized to lower
//! [`ppc_ir::IrNode`]s instead of directly dispatching on a raw PowerPC
//! instruction.

use core::mem::offset_of;

use cranelift::codegen::ir::{self, condcodes::IntCC};
use cranelift::codegen::isa::CallConv;
use cranelift::frontend::{FunctionBuilder, Variable};
use cranelift::prelude::InstBuilder;
use rustc_hash::FxHashMap;

use ppc_arch::DFlowReg;
use ppc_ir::{Condition, IrNode, IrOp, Operand, OperandSize};
use ppc_interp::MemoryMap;

use crate::context_layout::{self, Home};
use crate::error::BuildError;
use crate::hooks::Hooks;

struct RegSlot {
    var: Variable,
    modified: bool,
}

/// Lowers a block's worth of IR against a fresh two-parameter Cranelift
/// function (`ctx: *mut Context, hooks: *const Hooks`) already set up by the
/// caller. Consumes `bd`, since there's nothing left to do with the builder
/// once a block has been lowered but call `finalize()`.
pub(crate) struct Lowering<'a, 'f> {
    bd: &'a mut FunctionBuilder<'f>,
    ptr_type: ir::Type,
    ctx_ptr: ir::Value,
    hooks_ptr: ir::Value,
    vars: FxHashMap<DFlowReg, RegSlot>,
    hook_sigs: FxHashMap<(u8, bool), ir::SigRef>,
    map: &'a MemoryMap,
}

impl<'a, 'f> Lowering<'a, 'f> {
    pub(crate) fn new(
        bd: &'a mut FunctionBuilder<'f>,
        ptr_type: ir::Type,
        ctx_ptr: ir::Value,
        hooks_ptr: ir::Value,
        map: &'a MemoryMap,
    ) -> Self {
        Self { bd, ptr_type, ctx_ptr, hooks_ptr, vars: FxHashMap::default(), hook_sigs: FxHashMap::default(), map }
    }

    fn ty_of(&self, reg: DFlowReg) -> ir::Type {
        match context_layout::home(reg) {
            Home::Fpr64 { .. } => ir::types::F64,
            _ => ir::types::I32,
        }
    }

    /// Reads `reg`'s current value, loading it from `Context` on first use.
    fn get(&mut self, reg: DFlowReg) -> ir::Value {
        if let Some(slot) = self.vars.get(&reg) {
            return self.bd.use_var(slot.var);
        }

        let ty = self.ty_of(reg);
        let loaded = match context_layout::home(reg) {
            Home::Word32 { offset } => self.bd.ins().load(ty, ir::MemFlags::trusted(), self.ctx_ptr, offset),
            Home::Fpr64 { offset } => self.bd.ins().load(ty, ir::MemFlags::trusted(), self.ctx_ptr, offset),
            Home::SubWord32 { offset, bit_lo, bit_width } => {
                let word = self.bd.ins().load(ir::types::I32, ir::MemFlags::trusted(), self.ctx_ptr, offset);
                let shifted = self.bd.ins().ushr_imm(word, bit_lo as i64);
                self.bd.ins().band_imm(shifted, (1i64 << bit_width) - 1)
            }
            Home::Scratch => panic!("read of scratch register {reg:?} with no prior write in this block"),
            Home::Unsupported => panic!("{reg:?} has no back-end encoding"),
        };

        let var = self.bd.declare_var(ty);
        self.bd.def_var(var, loaded);
        self.vars.insert(reg, RegSlot { var, modified: false });
        loaded
    }

    /// Overwrites `reg` with `value`. Never re-reads the prior value — a
    /// `set` is always a full replacement, matching the source's `set()`.
    fn set(&mut self, reg: DFlowReg, value: ir::Value) {
        if let Some(slot) = self.vars.get_mut(&reg) {
            slot.modified = true;
            self.bd.def_var(slot.var, value);
            return;
        }

        let ty = self.ty_of(reg);
        let var = self.bd.declare_var(ty);
        self.bd.def_var(var, value);
        self.vars.insert(reg, RegSlot { var, modified: true });
    }

    fn operand_value(&mut self, operand: Operand, ty: ir::Type) -> ir::Value {
        match operand {
            Operand::Imm(v) => {
                if ty == ir::types::F64 {
                    self.bd.ins().f64const(f64::from_bits(v as u64))
                } else {
                    self.bd.ins().iconst(ty, v)
                }
            }
            Operand::Reg(reg) => self.get(reg),
        }
    }

    /// Writes back every register that was modified this block: a direct
    /// store for `Word32`/`Fpr64` homes, and a single grouped
    /// load-mask-store per `SubWord32` base offset (CR, XER) so two flags
    /// sharing one packed word don't race on write-back order, which is
    /// otherwise unspecified for a hash map.
    fn write_back(&mut self) {
        let mut groups: FxHashMap<i32, (u32, Option<ir::Value>)> = FxHashMap::default();

        for (&reg, slot) in &self.vars {
            if !slot.modified {
                continue;
            }
            let value = self.bd.use_var(slot.var);
            match context_layout::home(reg) {
                Home::Word32 { offset } | Home::Fpr64 { offset } => {
                    self.bd.ins().store(ir::MemFlags::trusted(), value, self.ctx_ptr, offset);
                }
                Home::SubWord32 { offset, bit_lo, bit_width } => {
                    let field_mask = (((1u32 << bit_width) - 1) << bit_lo) as u32;
                    let masked = self.bd.ins().band_imm(value, (1i64 << bit_width) - 1);
                    let shifted = self.bd.ins().ishl_imm(masked, bit_lo as i64);
                    let entry = groups.entry(offset).or_insert((0, None));
                    entry.0 |= field_mask;
                    entry.1 = Some(match entry.1 {
                        None => shifted,
                        Some(acc) => self.bd.ins().bor(acc, shifted),
                    });
                }
                Home::Scratch | Home::Unsupported => {}
            }
        }

        for (offset, (mask, bits)) in groups {
            let Some(bits) = bits else { continue };
            let current = self.bd.ins().load(ir::types::I32, ir::MemFlags::trusted(), self.ctx_ptr, offset);
            let cleared = self.bd.ins().band_imm(current, !mask as i64);
            let combined = self.bd.ins().bor(cleared, bits);
            self.bd.ins().store(ir::MemFlags::trusted(), combined, self.ctx_ptr, offset);
        }
    }

    /// Caches (and imports on first use) the Cranelift signature for a hook
    /// call of the given access width and direction.
    fn hook_signature(&mut self, width: u8, is_write: bool) -> ir::SigRef {
        if let Some(&sig) = self.hook_sigs.get(&(width, is_write)) {
            return sig;
        }

        let access_ty = match width {
            8 => ir::types::I8,
            16 => ir::types::I16,
            32 => ir::types::I32,
            64 => ir::types::I64,
            _ => unreachable!("memory access width is always 8/16/32/64"),
        };

        let mut params = vec![ir::AbiParam::new(self.ptr_type), ir::AbiParam::new(ir::types::I32)];
        let mut returns = vec![];
        if is_write {
            params.push(ir::AbiParam::new(access_ty));
        } else {
            returns.push(ir::AbiParam::new(access_ty));
        }
        params.push(ir::AbiParam::new(self.ptr_type));

        let sig = ir::Signature { params, returns, call_conv: CallConv::SystemV };
        let sig_ref = self.bd.import_signature(sig);
        self.hook_sigs.insert((width, is_write), sig_ref);
        sig_ref
    }

    fn hook_field_ptr(&mut self, field_offset: usize) -> ir::Value {
        self.bd.ins().load(self.ptr_type, ir::MemFlags::trusted(), self.hooks_ptr, field_offset as i32)
    }

    fn call_read_hook(&mut self, width: u8, addr: ir::Value) -> ir::Value {
        let fn_offset = match width {
            8 => offset_of!(Hooks, read8),
            16 => offset_of!(Hooks, read16),
            32 => offset_of!(Hooks, read32),
            64 => offset_of!(Hooks, read64),
            _ => unreachable!(),
        };
        let fn_ptr = self.hook_field_ptr(fn_offset);
        let map_ptr = self.hook_field_ptr(offset_of!(Hooks, map));
        let fault_ptr = self.hook_field_ptr(offset_of!(Hooks, fault));
        let sig = self.hook_signature(width, false);
        let call = self.bd.ins().call_indirect(sig, fn_ptr, &[map_ptr, addr, fault_ptr]);
        self.bd.inst_results(call)[0]
    }

    fn call_write_hook(&mut self, width: u8, addr: ir::Value, value: ir::Value) {
        let fn_offset = match width {
            8 => offset_of!(Hooks, write8),
            16 => offset_of!(Hooks, write16),
            32 => offset_of!(Hooks, write32),
            64 => offset_of!(Hooks, write64),
            _ => unreachable!(),
        };
        let fn_ptr = self.hook_field_ptr(fn_offset);
        let map_ptr = self.hook_field_ptr(offset_of!(Hooks, map));
        let fault_ptr = self.hook_field_ptr(offset_of!(Hooks, fault));
        self.bd.ins().call_indirect(self.hook_signature(width, true), fn_ptr, &[map_ptr, addr, value, fault_ptr]);
    }

    /// Lowers a load of `width` bits at `addr`: a direct inline load with an
    /// endianness fixup if `addr` is a translate-time constant resolving to
    /// a non-volatile buffer region, otherwise a hook call.
    fn lower_load(&mut self, width: u8, addr_operand: Operand) -> ir::Value {
        if let Operand::Imm(addr) = addr_operand {
            let resolved = match width {
                8 => self.map.resolve_read8(addr as u32).map(|(p, be)| (p, be)),
                16 => self.map.resolve_read16(addr as u32),
                32 => self.map.resolve_read32(addr as u32),
                _ => None,
            };
            if let Some((ptr, big_endian)) = resolved {
                let ty = match width {
                    8 => ir::types::I8,
                    16 => ir::types::I16,
                    _ => ir::types::I32,
                };
                let base = self.bd.ins().iconst(self.ptr_type, ptr as i64);
                let raw = self.bd.ins().load(ty, ir::MemFlags::trusted(), base, 0);
                let native = if width == 8 {
                    raw
                } else if big_endian == cfg!(target_endian = "big") {
                    raw
                } else {
                    self.bd.ins().bswap(raw)
                };
                return self.bd.ins().uextend(ir::types::I32, native);
            }
        }

        let addr = self.operand_value(addr_operand, ir::types::I32);
        let raw = self.call_read_hook(width, addr);
        if width == 64 {
            raw
        } else {
            self.bd.ins().uextend(ir::types::I32, raw)
        }
    }

    fn lower_store(&mut self, width: u8, value_operand: Operand, addr_operand: Operand) {
        if let Operand::Imm(addr) = addr_operand {
            let resolved = match width {
                8 => self.map.resolve_write8(addr as u32),
                16 => self.map.resolve_write16(addr as u32),
                32 => self.map.resolve_write32(addr as u32),
                _ => None,
            };
            if let Some((ptr, big_endian)) = resolved {
                let ty = match width {
                    8 => ir::types::I8,
                    16 => ir::types::I16,
                    _ => ir::types::I32,
                };
                let value = self.operand_value(value_operand, ir::types::I32);
                let narrowed = if ty == ir::types::I32 { value } else { self.bd.ins().ireduce(ty, value) };
                let native = if width == 8 {
                    narrowed
                } else if big_endian == cfg!(target_endian = "big") {
                    narrowed
                } else {
                    self.bd.ins().bswap(narrowed)
                };
                let base = self.bd.ins().iconst(self.ptr_type, ptr as i64);
                self.bd.ins().store(ir::MemFlags::trusted(), native, base, 0);
                return;
            }
        }

        let addr = self.operand_value(addr_operand, ir::types::I32);
        let value_ty = if width == 64 { ir::types::I64 } else { ir::types::I32 };
        let value = self.operand_value(value_operand, value_ty);
        self.call_write_hook(width, addr, value);
    }

    /// Finds the single CR field a `Cmp` node's surviving `dflow_out` bits
    /// belong to (dead-code elimination may have dropped some of `lt`/`gt`/
    /// `eq`, but whichever remain all share one field).
    fn cmp_field(node: &IrNode) -> Option<u8> {
        (0u8..32).find(|&bit| node.dflow_out.contains(DFlowReg::CrBit(bit))).map(|bit| bit / 4)
    }

    fn lower_cmp(&mut self, node: &IrNode) {
        let Some(field) = Self::cmp_field(node) else { return };
        let signed = matches!(node.cond, Some(Condition::SignedLess) | Some(Condition::SignedGreater));
        let a = self.operand_value(node.operands[0].unwrap(), ir::types::I32);
        let b = self.operand_value(node.operands[1].unwrap(), ir::types::I32);

        let (lt_cc, gt_cc) =
            if signed { (IntCC::SignedLessThan, IntCC::SignedGreaterThan) } else { (IntCC::UnsignedLessThan, IntCC::UnsignedGreaterThan) };

        for (flag, cc) in [(3u8, lt_cc), (2u8, gt_cc), (1u8, IntCC::Equal)] {
            let bit = field * 4 + flag;
            let dest = DFlowReg::CrBit(bit);
            if !node.dflow_out.contains(dest) {
                continue;
            }
            let cmp = self.bd.ins().icmp(cc, a, b);
            let widened = self.bd.ins().uextend(ir::types::I32, cmp);
            self.set(dest, widened);
        }
    }

    fn lower_branch(&mut self, node: &IrNode) {
        let target = self.operand_value(node.operands[0].unwrap(), ir::types::I32);
        self.bd.ins().store(ir::MemFlags::trusted(), target, self.ctx_ptr, context_layout::PC_OFFSET);
    }

    /// Writes `pc + 4` or the taken target into `Context::pc` depending on
    /// the materialized condition, via `select` rather than an actual
    /// Cranelift branch — this back-end's functions have a single exit
    /// point (the write-back-and-return `compile()` appends once, after the
    /// whole node list), so there's no second block for a real branch to
    /// join with.
    fn lower_bcond(&mut self, node: &IrNode) {
        let Some(Operand::Reg(cond_reg)) = node.operands[0] else { panic!("BCond operand 0 must be a register") };
        let cond = self.get(cond_reg);
        let taken = self.operand_value(node.operands[1].unwrap(), ir::types::I32);

        let pc = self.bd.ins().load(ir::types::I32, ir::MemFlags::trusted(), self.ctx_ptr, context_layout::PC_OFFSET);
        let fallthrough = self.bd.ins().iadd_imm(pc, 4);

        let taken_bool = self.bd.ins().icmp_imm(IntCC::NotEqual, cond, 0);
        let next_pc = self.bd.ins().select(taken_bool, taken, fallthrough);
        self.bd.ins().store(ir::MemFlags::trusted(), next_pc, self.ctx_ptr, context_layout::PC_OFFSET);
    }

    fn lower_sync(&mut self, node: &IrNode) {
        let Some(Operand::Imm(cycles)) = node.operands[0] else { panic!("Sync operand must be a constant cycle count") };
        let cycles_val = self.bd.ins().iconst(ir::types::I32, cycles);
        let advance_ptr = self.hook_field_ptr(offset_of!(Hooks, advance));

        let sig = ir::Signature {
            params: vec![ir::AbiParam::new(self.ptr_type), ir::AbiParam::new(ir::types::I32)],
            returns: vec![],
            call_conv: CallConv::SystemV,
        };
        let sig_ref = self.bd.import_signature(sig);
        self.bd.ins().call_indirect(sig_ref, advance_ptr, &[self.ctx_ptr, cycles_val]);
    }

    fn lower_convert(&mut self, node: &IrNode) {
        let dest = node.dest.unwrap();
        let src = node.operands[0].unwrap();
        match node.size {
            OperandSize::FloatToSingle => {
                let v = self.operand_value(src, ir::types::F64);
                let narrowed = self.bd.ins().fdemote(ir::types::F32, v);
                let widened = self.bd.ins().fpromote(ir::types::F64, narrowed);
                self.set(dest, widened);
            }
            OperandSize::FloatToDouble => {
                let v = self.operand_value(src, ir::types::F64);
                self.set(dest, v);
            }
            _ => unreachable!("Convert only carries float widening/narrowing sizes"),
        }
    }

    pub(crate) fn lower_node(&mut self, node: &IrNode) {
        match node.op {
            IrOp::Nop => {}

            IrOp::LoadI => {
                let v = self.operand_value(node.operands[0].unwrap(), ir::types::I32);
                self.set(node.dest.unwrap(), v);
            }
            IrOp::Move => {
                let dest = node.dest.unwrap();
                let v = self.operand_value(node.operands[0].unwrap(), self.ty_of(dest));
                self.set(dest, v);
            }

            IrOp::Add | IrOp::Sub | IrOp::Mulu | IrOp::And | IrOp::Or | IrOp::Xor | IrOp::Shl | IrOp::Shr | IrOp::Rol | IrOp::Ror => {
                let dest = node.dest.unwrap();
                let a = self.operand_value(node.operands[0].unwrap(), ir::types::I32);
                let b = self.operand_value(node.operands[1].unwrap(), ir::types::I32);
                let result = match node.op {
                    IrOp::Add => self.bd.ins().iadd(a, b),
                    IrOp::Sub => self.bd.ins().isub(a, b),
                    IrOp::Mulu => self.bd.ins().imul(a, b),
                    IrOp::And => self.bd.ins().band(a, b),
                    IrOp::Or => self.bd.ins().bor(a, b),
                    IrOp::Xor => self.bd.ins().bxor(a, b),
                    // Cranelift masks the shift/rotate amount to the
                    // operand width itself, matching the `& 0x1F` constant-
                    // folding semantics in `ppc_ir::Builder`.
                    IrOp::Shl => self.bd.ins().ishl(a, b),
                    IrOp::Shr => self.bd.ins().ushr(a, b),
                    IrOp::Rol => self.bd.ins().rotl(a, b),
                    IrOp::Ror => self.bd.ins().rotr(a, b),
                    _ => unreachable!(),
                };
                self.set(dest, result);
            }
            IrOp::Neg | IrOp::Not => {
                let dest = node.dest.unwrap();
                let a = self.operand_value(node.operands[0].unwrap(), ir::types::I32);
                let result = if node.op == IrOp::Neg { self.bd.ins().ineg(a) } else { self.bd.ins().bnot(a) };
                self.set(dest, result);
            }
            IrOp::Brev16 => {
                let dest = node.dest.unwrap();
                let a = self.operand_value(node.operands[0].unwrap(), ir::types::I32);
                let narrowed = self.bd.ins().ireduce(ir::types::I16, a);
                let reversed = self.bd.ins().bswap(narrowed);
                let result = self.bd.ins().uextend(ir::types::I32, reversed);
                self.set(dest, result);
            }
            IrOp::Brev32 => {
                let dest = node.dest.unwrap();
                let a = self.operand_value(node.operands[0].unwrap(), ir::types::I32);
                let result = self.bd.ins().bswap(a);
                self.set(dest, result);
            }

            IrOp::Cmp => self.lower_cmp(node),

            IrOp::Load8 => {
                let v = self.lower_load(8, node.operands[0].unwrap());
                self.set(node.dest.unwrap(), v);
            }
            IrOp::Load16 => {
                let v = self.lower_load(16, node.operands[0].unwrap());
                self.set(node.dest.unwrap(), v);
            }
            IrOp::Load32 => {
                let v = self.lower_load(32, node.operands[0].unwrap());
                self.set(node.dest.unwrap(), v);
            }
            IrOp::Load64 => {
                let v = self.lower_load(64, node.operands[0].unwrap());
                self.set(node.dest.unwrap(), v);
            }
            IrOp::Store8 => self.lower_store(8, node.operands[0].unwrap(), node.operands[1].unwrap()),
            IrOp::Store16 => self.lower_store(16, node.operands[0].unwrap(), node.operands[1].unwrap()),
            IrOp::Store32 => self.lower_store(32, node.operands[0].unwrap(), node.operands[1].unwrap()),
            IrOp::Store64 => self.lower_store(64, node.operands[0].unwrap(), node.operands[1].unwrap()),

            IrOp::LoadPtr32 => {
                let Some(Operand::Imm(offset)) = node.operands[0] else { panic!("LoadPtr32 offset must be constant") };
                let v = self.bd.ins().load(ir::types::I32, ir::MemFlags::trusted(), self.ctx_ptr, offset as i32);
                self.set(node.dest.unwrap(), v);
            }
            IrOp::StorePtr32 => {
                let value = self.operand_value(node.operands[0].unwrap(), ir::types::I32);
                let Some(Operand::Imm(offset)) = node.operands[1] else { panic!("StorePtr32 offset must be constant") };
                self.bd.ins().store(ir::MemFlags::trusted(), value, self.ctx_ptr, offset as i32);
            }

            IrOp::CallRead => {
                let width = match node.size {
                    OperandSize::Int8 => 8,
                    OperandSize::Int16 => 16,
                    OperandSize::Int64 => 64,
                    _ => 32,
                };
                let addr = self.operand_value(node.operands[0].unwrap(), ir::types::I32);
                let raw = self.call_read_hook(width, addr);
                let v = if width == 64 { raw } else { self.bd.ins().uextend(ir::types::I32, raw) };
                self.set(node.dest.unwrap(), v);
            }

            IrOp::Branch => self.lower_branch(node),
            IrOp::BCond => self.lower_bcond(node),
            IrOp::Sync => self.lower_sync(node),
            IrOp::Convert => self.lower_convert(node),

            IrOp::FAdd | IrOp::FSub | IrOp::FMul | IrOp::FDiv => {
                let dest = node.dest.unwrap();
                let a = self.operand_value(node.operands[0].unwrap(), ir::types::F64);
                let b = self.operand_value(node.operands[1].unwrap(), ir::types::F64);
                let result = match node.op {
                    IrOp::FAdd => self.bd.ins().fadd(a, b),
                    IrOp::FSub => self.bd.ins().fsub(a, b),
                    IrOp::FMul => self.bd.ins().fmul(a, b),
                    IrOp::FDiv => self.bd.ins().fdiv(a, b),
                    _ => unreachable!(),
                };
                self.set(dest, result);
            }
        }
    }

    /// Lowers every node in order, then writes back modified registers and
    /// returns. Called once per compiled block.
    pub(crate) fn finish(mut self, nodes: &[IrNode]) -> Result<(), BuildError> {
        if nodes.is_empty() {
            return Err(BuildError::EmptyBlock);
        }
        for node in nodes {
            self.lower_node(node);
        }
        self.write_back();
        self.bd.ins().return_(&[]);
        Ok(())
    }
}
