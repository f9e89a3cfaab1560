//! Per-block IR construction: constant folding on encode, data-flow vector
//! bookkeeping, and dead-code elimination at block end.

use crate::dce;
use crate::node::{Condition, IrNode, IrOp, Operand, OperandSize};
use ppc_arch::{DFlowReg, DFlowSet, dflow::DFLOW_COUNT};

/// Builds one basic block's worth of IR. Reused across blocks: `begin_block`
/// resets the node slab and the constant map rather than allocating fresh
/// ones, the same "arena with a reset, not a free" discipline `jit-arena`
/// uses for raw bytes.
pub struct Builder {
    /// Slab of nodes; index 0 is always the sentinel `Nop`.
    nodes: Vec<IrNode>,
    /// Per-encode constant map, indexed by `DFlowReg::index()`. `Some(k)`
    /// means the register is known to hold `k` at this point in the block.
    constants: Vec<Option<i64>>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            nodes: vec![IrNode::sentinel()],
            constants: vec![None; DFLOW_COUNT],
        }
    }

    /// Like [`Self::new`], but pre-sizes the node slab to `capacity` nodes —
    /// a hint for a host that knows roughly how large its translated blocks
    /// run, avoiding a handful of early reallocations.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut nodes = Vec::with_capacity(capacity.max(1));
        nodes.push(IrNode::sentinel());
        Self {
            nodes,
            constants: vec![None; DFLOW_COUNT],
        }
    }

    /// Resets the IR arena for a new block: clears the slab back to just
    /// the sentinel and wipes the constant map.
    pub fn begin_block(&mut self) {
        self.nodes.clear();
        self.nodes.push(IrNode::sentinel());
        self.nodes[0].next = 0;
        self.nodes[0].prev = 0;
        self.constants.iter_mut().for_each(|c| *c = None);
    }

    /// Runs dead-code elimination and returns the finalized, emission-order
    /// node list (sentinel excluded).
    pub fn end_block(&mut self) -> Vec<IrNode> {
        dce::run(&mut self.nodes);

        let mut out = Vec::new();
        let mut idx = self.nodes[0].next;
        while idx != 0 {
            out.push(self.nodes[idx as usize]);
            idx = self.nodes[idx as usize].next;
        }
        out
    }

    fn resolve(&self, operand: Operand) -> Option<i64> {
        match operand {
            Operand::Imm(v) => Some(v),
            Operand::Reg(r) => self.constants[r.index()],
        }
    }

    fn set_constant(&mut self, dest: DFlowReg, value: Option<i64>) {
        self.constants[dest.index()] = value;
    }

    /// Appends `node` before the sentinel (i.e. at the current tail of the
    /// block).
    fn push(&mut self, mut node: IrNode) {
        let idx = self.nodes.len() as u32;
        let tail = self.nodes[0].prev;

        node.prev = tail;
        node.next = 0;
        self.nodes.push(node);

        self.nodes[tail as usize].next = idx;
        self.nodes[0].prev = idx;
    }

    fn dflow_of(operands: &[Option<Operand>]) -> DFlowSet {
        let mut set = DFlowSet::EMPTY;
        for operand in operands.iter().flatten() {
            if let Some(reg) = operand.reg() {
                set.set(reg);
            }
        }
        set
    }

    /// Encodes `dest := k`, the universal fold target. Always emits exactly
    /// one node (dead-code elimination may remove it later).
    pub fn loadi(&mut self, dest: DFlowReg, value: i64) {
        let mut dflow_out = DFlowSet::EMPTY;
        dflow_out.set(dest);

        self.push(IrNode {
            op: IrOp::LoadI,
            dest: Some(dest),
            operands: [Some(Operand::Imm(value)), None, None],
            cond: None,
            size: OperandSize::Int32,
            must_emit: false,
            dflow_in: DFlowSet::EMPTY,
            dflow_out,
            next: 0,
            prev: 0,
        });
        self.set_constant(dest, Some(value));
    }

    pub fn mov(&mut self, dest: DFlowReg, src: Operand) {
        if let Some(k) = self.resolve(src) {
            self.loadi(dest, k);
            return;
        }

        let operands = [Some(src), None, None];
        let mut dflow_out = DFlowSet::EMPTY;
        dflow_out.set(dest);

        self.push(IrNode {
            op: IrOp::Move,
            dest: Some(dest),
            operands,
            cond: None,
            size: OperandSize::Int32,
            must_emit: false,
            dflow_in: Self::dflow_of(&operands),
            dflow_out,
            next: 0,
            prev: 0,
        });
        self.set_constant(dest, None);
    }

    /// Shared shape for every two-operand arithmetic/bitwise/shift/rotate
    /// encoder: fold to `LoadI` if both sources are statically known,
    /// otherwise append exactly one node.
    fn binary(
        &mut self,
        op: IrOp,
        dest: DFlowReg,
        a: Operand,
        b: Operand,
        eval: impl FnOnce(i64, i64) -> i64,
    ) {
        if let (Some(av), Some(bv)) = (self.resolve(a), self.resolve(b)) {
            self.loadi(dest, eval(av, bv));
            return;
        }

        let operands = [Some(a), Some(b), None];
        let mut dflow_out = DFlowSet::EMPTY;
        dflow_out.set(dest);

        self.push(IrNode {
            op,
            dest: Some(dest),
            operands,
            cond: None,
            size: OperandSize::Int32,
            must_emit: false,
            dflow_in: Self::dflow_of(&operands),
            dflow_out,
            next: 0,
            prev: 0,
        });
        self.set_constant(dest, None);
    }

    fn unary(&mut self, op: IrOp, dest: DFlowReg, a: Operand, eval: impl FnOnce(i64) -> i64) {
        if let Some(av) = self.resolve(a) {
            self.loadi(dest, eval(av));
            return;
        }

        let operands = [Some(a), None, None];
        let mut dflow_out = DFlowSet::EMPTY;
        dflow_out.set(dest);

        self.push(IrNode {
            op,
            dest: Some(dest),
            operands,
            cond: None,
            size: OperandSize::Int32,
            must_emit: false,
            dflow_in: Self::dflow_of(&operands),
            dflow_out,
            next: 0,
            prev: 0,
        });
        self.set_constant(dest, None);
    }

    pub fn add(&mut self, dest: DFlowReg, a: Operand, b: Operand) {
        self.binary(IrOp::Add, dest, a, b, |a, b| {
            ((a as u32).wrapping_add(b as u32)) as i64
        });
    }

    pub fn sub(&mut self, dest: DFlowReg, a: Operand, b: Operand) {
        self.binary(IrOp::Sub, dest, a, b, |a, b| {
            ((a as u32).wrapping_sub(b as u32)) as i64
        });
    }

    pub fn neg(&mut self, dest: DFlowReg, a: Operand) {
        self.unary(IrOp::Neg, dest, a, |a| (a as u32).wrapping_neg() as i64);
    }

    pub fn mulu(&mut self, dest: DFlowReg, a: Operand, b: Operand) {
        self.binary(IrOp::Mulu, dest, a, b, |a, b| {
            ((a as u32).wrapping_mul(b as u32)) as i64
        });
    }

    pub fn and(&mut self, dest: DFlowReg, a: Operand, b: Operand) {
        self.binary(IrOp::And, dest, a, b, |a, b| ((a as u32) & (b as u32)) as i64);
    }

    pub fn or(&mut self, dest: DFlowReg, a: Operand, b: Operand) {
        self.binary(IrOp::Or, dest, a, b, |a, b| ((a as u32) | (b as u32)) as i64);
    }

    pub fn xor(&mut self, dest: DFlowReg, a: Operand, b: Operand) {
        self.binary(IrOp::Xor, dest, a, b, |a, b| ((a as u32) ^ (b as u32)) as i64);
    }

    pub fn not(&mut self, dest: DFlowReg, a: Operand) {
        self.unary(IrOp::Not, dest, a, |a| !(a as u32) as i64);
    }

    /// Shift amounts are always unsigned and masked to `0x1F` by the caller
    /// (the front-end decoder) before they reach this encoder.
    pub fn shl(&mut self, dest: DFlowReg, a: Operand, amount: Operand) {
        self.binary(IrOp::Shl, dest, a, amount, |a, s| {
            ((a as u32).wrapping_shl(s as u32 & 0x1F)) as i64
        });
    }

    pub fn shr(&mut self, dest: DFlowReg, a: Operand, amount: Operand) {
        self.binary(IrOp::Shr, dest, a, amount, |a, s| {
            ((a as u32).wrapping_shr(s as u32 & 0x1F)) as i64
        });
    }

    pub fn rol(&mut self, dest: DFlowReg, a: Operand, amount: Operand) {
        self.binary(IrOp::Rol, dest, a, amount, |a, s| {
            (a as u32).rotate_left(s as u32 & 0x1F) as i64
        });
    }

    pub fn ror(&mut self, dest: DFlowReg, a: Operand, amount: Operand) {
        self.binary(IrOp::Ror, dest, a, amount, |a, s| {
            (a as u32).rotate_right(s as u32 & 0x1F) as i64
        });
    }

    pub fn brev16(&mut self, dest: DFlowReg, a: Operand) {
        self.unary(IrOp::Brev16, dest, a, |a| {
            let bytes = (a as u16).to_le_bytes();
            u16::from_be_bytes(bytes) as i64
        });
    }

    pub fn brev32(&mut self, dest: DFlowReg, a: Operand) {
        self.unary(IrOp::Brev32, dest, a, |a| {
            let bytes = (a as u32).to_le_bytes();
            u32::from_be_bytes(bytes) as i64
        });
    }

    /// Compares `a` against `b` and writes the `{lt,gt,eq,so}` nibble
    /// (caller supplies the four destination bits, typically
    /// `DFlowReg::CrBit` for one CR field). The `so` slot is always loaded
    /// with `0` when folded — architecturally `cmp` copies XER's summary
    /// overflow bit instead, which the caller applies separately.
    ///
    /// Signed comparisons widen to 32-bit two's complement, matching
    /// PowerPC's `cmp`/`cmpl` semantics.
    pub fn cmp(&mut self, crf: [DFlowReg; 4], signed: bool, a: Operand, b: Operand) {
        if let (Some(av), Some(bv)) = (self.resolve(a), self.resolve(b)) {
            let (lt, gt, eq) = if signed {
                let (av, bv) = (av as i32, bv as i32);
                (av < bv, av > bv, av == bv)
            } else {
                let (av, bv) = (av as u32, bv as u32);
                (av < bv, av > bv, av == bv)
            };
            self.loadi(crf[0], lt as i64);
            self.loadi(crf[1], gt as i64);
            self.loadi(crf[2], eq as i64);
            self.loadi(crf[3], 0);
            return;
        }

        let operands = [Some(a), Some(b), None];
        let mut dflow_out = DFlowSet::EMPTY;
        for reg in crf {
            dflow_out.set(reg);
        }

        let cond = if signed {
            Condition::SignedLess
        } else {
            Condition::UnsignedLess
        };

        self.push(IrNode {
            op: IrOp::Cmp,
            dest: None,
            operands,
            cond: Some(cond),
            size: OperandSize::Int32,
            must_emit: false,
            dflow_in: Self::dflow_of(&operands),
            dflow_out,
            next: 0,
            prev: 0,
        });
        for reg in crf {
            self.set_constant(reg, None);
        }
    }

    fn must_emit_node(
        &mut self,
        op: IrOp,
        dest: Option<DFlowReg>,
        operands: [Option<Operand>; 3],
        size: OperandSize,
    ) {
        let mut dflow_out = DFlowSet::EMPTY;
        if let Some(dest) = dest {
            dflow_out.set(dest);
        }

        self.push(IrNode {
            op,
            dest,
            operands,
            cond: None,
            size,
            must_emit: true,
            dflow_in: Self::dflow_of(&operands),
            dflow_out,
            next: 0,
            prev: 0,
        });
        if let Some(dest) = dest {
            self.set_constant(dest, None);
        }
    }

    pub fn load8(&mut self, dest: DFlowReg, addr: Operand) {
        self.must_emit_node(IrOp::Load8, Some(dest), [Some(addr), None, None], OperandSize::Int8);
    }
    pub fn load16(&mut self, dest: DFlowReg, addr: Operand) {
        self.must_emit_node(IrOp::Load16, Some(dest), [Some(addr), None, None], OperandSize::Int16);
    }
    pub fn load32(&mut self, dest: DFlowReg, addr: Operand) {
        self.must_emit_node(IrOp::Load32, Some(dest), [Some(addr), None, None], OperandSize::Int32);
    }
    pub fn load64(&mut self, dest: DFlowReg, addr: Operand) {
        self.must_emit_node(IrOp::Load64, Some(dest), [Some(addr), None, None], OperandSize::Int64);
    }

    pub fn store8(&mut self, value: Operand, addr: Operand) {
        self.must_emit_node(IrOp::Store8, None, [Some(value), Some(addr), None], OperandSize::Int8);
    }
    pub fn store16(&mut self, value: Operand, addr: Operand) {
        self.must_emit_node(IrOp::Store16, None, [Some(value), Some(addr), None], OperandSize::Int16);
    }
    pub fn store32(&mut self, value: Operand, addr: Operand) {
        self.must_emit_node(IrOp::Store32, None, [Some(value), Some(addr), None], OperandSize::Int32);
    }
    pub fn store64(&mut self, value: Operand, addr: Operand) {
        self.must_emit_node(IrOp::Store64, None, [Some(value), Some(addr), None], OperandSize::Int64);
    }

    /// Direct host-pointer access to a `Context` field at byte offset
    /// `offset`, bypassing the memory map (used for SPR-file-style plumbing
    /// the back-end needs raw access to).
    pub fn load_ptr32(&mut self, dest: DFlowReg, offset: u32) {
        self.must_emit_node(
            IrOp::LoadPtr32,
            Some(dest),
            [Some(Operand::Imm(offset as i64)), None, None],
            OperandSize::Int32,
        );
    }

    pub fn store_ptr32(&mut self, value: Operand, offset: u32) {
        self.must_emit_node(
            IrOp::StorePtr32,
            None,
            [Some(value), Some(Operand::Imm(offset as i64)), None],
            OperandSize::Int32,
        );
    }

    /// Slow-path call into the memory map's generic read handler, used when
    /// the effective address isn't known at translate time.
    pub fn call_read(&mut self, dest: DFlowReg, addr: Operand, size: OperandSize) {
        self.must_emit_node(IrOp::CallRead, Some(dest), [Some(addr), None, None], size);
    }

    pub fn branch(&mut self, target: Operand) {
        self.must_emit_node(IrOp::Branch, None, [Some(target), None, None], OperandSize::Int32);
    }

    /// `cond` is a single CR (or derived boolean) DFLOW bit; `taken` is the
    /// branch target if `cond` holds. The fall-through target is the
    /// engine's natural `pc + 4` and isn't threaded through the IR.
    pub fn bcond(&mut self, cond: DFlowReg, taken: Operand) {
        self.must_emit_node(
            IrOp::BCond,
            None,
            [Some(Operand::Reg(cond)), Some(taken), None],
            OperandSize::Int32,
        );
    }

    /// Advances the timebase/decrementer by a translate-time-constant
    /// source-instruction count; inserted once per translated block.
    pub fn sync(&mut self, cycles: u32) {
        self.must_emit_node(IrOp::Sync, None, [Some(Operand::Imm(cycles as i64)), None, None], OperandSize::Int32);
    }

    pub fn convert(&mut self, dest: DFlowReg, src: Operand, size: OperandSize) {
        let operands = [Some(src), None, None];
        let mut dflow_out = DFlowSet::EMPTY;
        dflow_out.set(dest);

        self.push(IrNode {
            op: IrOp::Convert,
            dest: Some(dest),
            operands,
            cond: None,
            size,
            must_emit: false,
            dflow_in: Self::dflow_of(&operands),
            dflow_out,
            next: 0,
            prev: 0,
        });
        self.set_constant(dest, None);
    }

    fn fbinary(&mut self, op: IrOp, dest: DFlowReg, a: Operand, b: Operand) {
        let operands = [Some(a), Some(b), None];
        let mut dflow_out = DFlowSet::EMPTY;
        dflow_out.set(dest);

        self.push(IrNode {
            op,
            dest: Some(dest),
            operands,
            cond: None,
            size: OperandSize::Int64,
            must_emit: false,
            dflow_in: Self::dflow_of(&operands),
            dflow_out,
            next: 0,
            prev: 0,
        });
        self.set_constant(dest, None);
    }

    pub fn fadd(&mut self, dest: DFlowReg, a: Operand, b: Operand) {
        self.fbinary(IrOp::FAdd, dest, a, b);
    }
    pub fn fsub(&mut self, dest: DFlowReg, a: Operand, b: Operand) {
        self.fbinary(IrOp::FSub, dest, a, b);
    }
    pub fn fmul(&mut self, dest: DFlowReg, a: Operand, b: Operand) {
        self.fbinary(IrOp::FMul, dest, a, b);
    }
    pub fn fdiv(&mut self, dest: DFlowReg, a: Operand, b: Operand) {
        self.fbinary(IrOp::FDiv, dest, a, b);
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppc_arch::registers::GPR;

    /// §8 round-trip law: `LOADI d,k ; ADD d',d,0` reduces to `LOADI d',k`.
    #[test]
    fn constant_folding_is_complete_through_add() {
        let mut b = Builder::new();
        b.begin_block();
        b.loadi(DFlowReg::Temp(0), 0x10);
        b.add(DFlowReg::Gpr(GPR::R3), Operand::Reg(DFlowReg::Temp(0)), Operand::Imm(0));
        let finalized = b.end_block();

        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].op, IrOp::LoadI);
        assert_eq!(finalized[0].operands[0], Some(Operand::Imm(0x10)));
    }

    /// §8 scenario 3: two constant loads feeding an add fold to a single
    /// `LoadI`, and dead-code removal deletes the two inputs.
    #[test]
    fn chained_constant_arithmetic_collapses_to_one_node() {
        let mut b = Builder::new();
        b.begin_block();
        b.loadi(DFlowReg::Temp(0), 0x10);
        b.loadi(DFlowReg::Temp(1), 0x20);
        b.add(
            DFlowReg::Gpr(GPR::R3),
            Operand::Reg(DFlowReg::Temp(0)),
            Operand::Reg(DFlowReg::Temp(1)),
        );
        let finalized = b.end_block();

        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].op, IrOp::LoadI);
        assert_eq!(finalized[0].dest, Some(DFlowReg::Gpr(GPR::R3)));
        assert_eq!(finalized[0].operands[0], Some(Operand::Imm(0x30)));
    }

    #[test]
    fn non_constant_add_emits_single_node_with_dflow() {
        let mut b = Builder::new();
        b.begin_block();
        b.add(
            DFlowReg::Gpr(GPR::R3),
            Operand::Reg(DFlowReg::Gpr(GPR::R4)),
            Operand::Reg(DFlowReg::Gpr(GPR::R5)),
        );
        let finalized = b.end_block();

        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].op, IrOp::Add);
        assert!(finalized[0].dflow_in.contains(DFlowReg::Gpr(GPR::R4)));
        assert!(finalized[0].dflow_in.contains(DFlowReg::Gpr(GPR::R5)));
    }

    #[test]
    fn stores_always_survive_dead_code_elimination() {
        let mut b = Builder::new();
        b.begin_block();
        b.store32(Operand::Imm(0xDEAD), Operand::Imm(0x1000));
        let finalized = b.end_block();
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].op, IrOp::Store32);
    }

    #[test]
    fn begin_block_clears_constants_across_blocks() {
        let mut b = Builder::new();
        b.begin_block();
        b.loadi(DFlowReg::Gpr(GPR::R3), 5);
        b.begin_block();
        // without the reset this would fold to LoadI 5 again
        b.add(
            DFlowReg::Gpr(GPR::R4),
            Operand::Reg(DFlowReg::Gpr(GPR::R3)),
            Operand::Imm(1),
        );
        let finalized = b.end_block();
        assert_eq!(finalized[0].op, IrOp::Add);
    }
}
