//! Single-instruction interpretation: the tier every basic block starts in,
//! and the tier a block falls back to for `sc`, `rfi` and anything the
//! back-end doesn't lower.
//!
//! Dispatch goes through [`ppc_arch::decode`]'s build-time-verified table,
//! then a `match` over the resulting [`ppc_arch::Opcode`] — one total
//! mapping reused instead of a second, hand-maintained 65536-entry
//! function-pointer table.

use ppc_arch::{
    Address, Ins, Model, Opcode,
    registers::{Cond, GPR, SPR},
};

use crate::{
    context::Context,
    error::{Error, RuntimeError},
    memory::MemoryMap,
};

/// What the step loop should do with `pc` after this instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Fall through to `pc + 4`.
    Next,
    /// Redirect `pc` to this address (taken branch).
    Jump(Address),
    /// `sc`: the host must service a system call and resume at `pc + 4`.
    Syscall,
}

fn gpr(ctx: &Context, index: u8) -> u32 {
    ctx.gpr(GPR::new(index))
}

fn set_gpr(ctx: &mut Context, index: u8, value: u32) {
    ctx.set_gpr(GPR::new(index), value);
}

fn update_cr0(ctx: &mut Context, result: i32) {
    let cond = Cond::default()
        .with_lt(result < 0)
        .with_gt(result > 0)
        .with_eq(result == 0)
        .with_so(ctx.xer.summary_overflow());
    ctx.cr = ctx.cr.with_field(7, cond);
}

/// Builds the `rlwinm`-family mask selecting architectural bits `mb..=me`
/// (bit 0 = MSB, bit 31 = LSB), wrapping around if `mb > me`.
fn rotate_mask(mb: u8, me: u8) -> u32 {
    let mut mask = 0u32;
    let mut bit = mb;
    loop {
        mask |= 1u32 << (31 - bit);
        if bit == me {
            break;
        }
        bit = (bit + 1) % 32;
    }
    mask
}

/// Interprets one instruction, returning how `pc` should move next and a
/// cycle cost for timebase advancement.
pub fn step(ctx: &mut Context, map: &MemoryMap, model: Model, ins: Ins) -> Result<(Flow, u32), Error> {
    let opcode = ppc_arch::decode(ins.dispatch_index());
    let pc = ctx.pc;

    let flow = match opcode {
        Opcode::Illegal => {
            return Err(Error::Runtime { source: RuntimeError::IllegalInstruction { address: pc } });
        }

        Opcode::AddI => {
            let base = if ins.ra() == 0 { 0 } else { gpr(ctx, ins.ra()) };
            set_gpr(ctx, ins.rd(), base.wrapping_add(ins.simm() as u32));
            Flow::Next
        }
        Opcode::AddIS => {
            let base = if ins.ra() == 0 { 0 } else { gpr(ctx, ins.ra()) };
            set_gpr(ctx, ins.rd(), base.wrapping_add((ins.uimm() as u32) << 16));
            Flow::Next
        }
        Opcode::Ori => {
            set_gpr(ctx, ins.ra(), gpr(ctx, ins.rs()) | ins.uimm());
            Flow::Next
        }
        Opcode::OrIs => {
            set_gpr(ctx, ins.ra(), gpr(ctx, ins.rs()) | (ins.uimm() << 16));
            Flow::Next
        }
        Opcode::XorI => {
            set_gpr(ctx, ins.ra(), gpr(ctx, ins.rs()) ^ ins.uimm());
            Flow::Next
        }
        Opcode::XorIS => {
            set_gpr(ctx, ins.ra(), gpr(ctx, ins.rs()) ^ (ins.uimm() << 16));
            Flow::Next
        }
        Opcode::AndIDot => {
            let result = gpr(ctx, ins.rs()) & ins.uimm();
            set_gpr(ctx, ins.ra(), result);
            update_cr0(ctx, result as i32);
            Flow::Next
        }
        Opcode::AndISDot => {
            let result = gpr(ctx, ins.rs()) & (ins.uimm() << 16);
            set_gpr(ctx, ins.ra(), result);
            update_cr0(ctx, result as i32);
            Flow::Next
        }
        Opcode::CmpI => {
            let result = (gpr(ctx, ins.ra()) as i32).cmp(&ins.simm());
            write_cmp(ctx, ins.crf_d(), result, ctx.xer.summary_overflow());
            Flow::Next
        }
        Opcode::CmpLI => {
            let result = gpr(ctx, ins.ra()).cmp(&ins.uimm());
            write_cmp(ctx, ins.crf_d(), result, ctx.xer.summary_overflow());
            Flow::Next
        }

        Opcode::Add => {
            let result = gpr(ctx, ins.ra()).wrapping_add(gpr(ctx, ins.rb()));
            set_gpr(ctx, ins.rd(), result);
            if ins.rc() {
                update_cr0(ctx, result as i32);
            }
            Flow::Next
        }
        Opcode::SubF => {
            let result = gpr(ctx, ins.rb()).wrapping_sub(gpr(ctx, ins.ra()));
            set_gpr(ctx, ins.rd(), result);
            if ins.rc() {
                update_cr0(ctx, result as i32);
            }
            Flow::Next
        }
        Opcode::And => bitwise(ctx, ins, |a, b| a & b),
        Opcode::Or => bitwise(ctx, ins, |a, b| a | b),
        Opcode::Xor => bitwise(ctx, ins, |a, b| a ^ b),
        Opcode::Nor => bitwise(ctx, ins, |a, b| !(a | b)),
        Opcode::Cmp => {
            let result = (gpr(ctx, ins.ra()) as i32).cmp(&(gpr(ctx, ins.rb()) as i32));
            write_cmp(ctx, ins.crf_d(), result, ctx.xer.summary_overflow());
            Flow::Next
        }
        Opcode::CmpL => {
            let result = gpr(ctx, ins.ra()).cmp(&gpr(ctx, ins.rb()));
            write_cmp(ctx, ins.crf_d(), result, ctx.xer.summary_overflow());
            Flow::Next
        }
        Opcode::Slw => shift(ctx, ins, |v, n| if n >= 32 { 0 } else { v << n }),
        Opcode::Srw => shift(ctx, ins, |v, n| if n >= 32 { 0 } else { v >> n }),
        Opcode::Sraw => {
            let value = gpr(ctx, ins.rs()) as i32;
            let shift = gpr(ctx, ins.rb()) & 0x3F;
            let (result, carry) = if shift >= 32 {
                (if value < 0 { -1 } else { 0 }, value < 0)
            } else {
                let result = value >> shift;
                let carry = value < 0 && (value & ((1 << shift) - 1).max(0)) != 0;
                (result, carry)
            };
            set_gpr(ctx, ins.ra(), result as u32);
            ctx.xer = ctx.xer.with_carry(carry);
            if ins.rc() {
                update_cr0(ctx, result);
            }
            Flow::Next
        }
        Opcode::SrawI => {
            let value = gpr(ctx, ins.rs()) as i32;
            let shift = ins.sh();
            let result = value >> shift;
            let carry = value < 0 && (value & ((1i32 << shift).wrapping_sub(1))) != 0;
            set_gpr(ctx, ins.ra(), result as u32);
            ctx.xer = ctx.xer.with_carry(carry);
            if ins.rc() {
                update_cr0(ctx, result);
            }
            Flow::Next
        }
        Opcode::CntlzW => {
            let result = gpr(ctx, ins.rs()).leading_zeros();
            set_gpr(ctx, ins.ra(), result);
            if ins.rc() {
                update_cr0(ctx, result as i32);
            }
            Flow::Next
        }
        Opcode::RlwiNM => {
            let rotated = gpr(ctx, ins.rs()).rotate_left(ins.sh() as u32);
            let mask = rotate_mask(ins.mb(), ins.me());
            let result = rotated & mask;
            set_gpr(ctx, ins.ra(), result);
            if ins.rc() {
                update_cr0(ctx, result as i32);
            }
            Flow::Next
        }

        Opcode::Lwz => load32(ctx, map, ins)?,
        Opcode::Lwzx => load32x(ctx, map, ins, false)?,
        Opcode::Lhz => load16(ctx, map, ins)?,
        Opcode::Lhzx => load16x(ctx, map, ins, false)?,
        Opcode::Lbz => load8(ctx, map, ins)?,
        Opcode::Lbzx => load8x(ctx, map, ins)?,
        Opcode::Stw => store32(ctx, map, ins)?,
        Opcode::Stwx => store32x(ctx, map, ins)?,
        Opcode::Sth => store16(ctx, map, ins)?,
        Opcode::Sthx => store16x(ctx, map, ins)?,
        Opcode::Stb => store8(ctx, map, ins)?,
        Opcode::Stbx => store8x(ctx, map, ins)?,
        Opcode::LwBrx => load32x(ctx, map, ins, true)?,
        Opcode::StwBrx => {
            let addr = effective_x(ctx, ins);
            map.generic_write32(addr, gpr(ctx, ins.rs()).swap_bytes())?;
            Flow::Next
        }
        Opcode::LhBrx => load16x(ctx, map, ins, true)?,
        Opcode::SthBrx => {
            let addr = effective_x(ctx, ins);
            map.generic_write16(addr, (gpr(ctx, ins.rs()) as u16).swap_bytes())?;
            Flow::Next
        }
        Opcode::Lwarx => {
            let addr = effective_x(ctx, ins);
            let value = map.generic_read32(addr)?;
            set_gpr(ctx, ins.rd(), value);
            ctx.reservation = Some(addr);
            Flow::Next
        }
        Opcode::Stwcx => {
            let addr = effective_x(ctx, ins);
            let success = ctx.reservation == Some(addr);
            if success {
                map.generic_write32(addr, gpr(ctx, ins.rs()))?;
            }
            ctx.reservation = None;
            let cond = Cond::default().with_eq(success).with_so(ctx.xer.summary_overflow());
            ctx.cr = ctx.cr.with_field(7, cond);
            Flow::Next
        }

        Opcode::B => Flow::Jump(branch_target(pc, ins.branch_disp(), ins.aa())),
        Opcode::Bc => {
            if branch_taken(ctx, ins.bo(), ins.bi()) {
                Flow::Jump(branch_target(pc, ins.bc_disp(), ins.aa()))
            } else {
                Flow::Next
            }
        }
        Opcode::Bclr => {
            if branch_taken(ctx, ins.bo(), ins.bi()) {
                Flow::Jump(Address(ctx.lr & !0b11))
            } else {
                Flow::Next
            }
        }
        Opcode::Bcctr => {
            if branch_taken(ctx, ins.bo(), ins.bi()) {
                Flow::Jump(Address(ctx.ctr & !0b11))
            } else {
                Flow::Next
            }
        }

        Opcode::Mfspr => {
            set_gpr(ctx, ins.rd(), read_spr(ctx, ins.spr()));
            Flow::Next
        }
        Opcode::Mtspr => {
            write_spr(ctx, ins.spr(), gpr(ctx, ins.rs()));
            Flow::Next
        }
        Opcode::Mfmsr => {
            set_gpr(ctx, ins.rd(), ctx.msr.to_bits());
            Flow::Next
        }
        Opcode::Mtmsr => {
            ctx.msr = ppc_arch::registers::MachineState::from_bits(gpr(ctx, ins.rs()));
            Flow::Next
        }
        Opcode::Mfcr => {
            set_gpr(ctx, ins.rd(), ctx.cr.to_bits());
            Flow::Next
        }
        Opcode::Mtcrf => {
            let mask = ins.bits_crm();
            let value = gpr(ctx, ins.rs());
            ctx.cr = ppc_arch::registers::CondReg::from_bits((ctx.cr.to_bits() & !mask) | (value & mask));
            Flow::Next
        }
        Opcode::Sc => Flow::Syscall,
        Opcode::Rfi => {
            let srr0 = ctx.spr[SPR::Srr0 as usize];
            let srr1 = ctx.spr[SPR::Srr1 as usize];
            ctx.msr = ppc_arch::registers::MachineState::from_bits(srr1);
            Flow::Jump(Address(srr0))
        }
        Opcode::Isync | Opcode::Sync | Opcode::Eieio => Flow::Next,

        Opcode::Lfs => {
            let addr = effective_d(ctx, ins);
            let bits = map.generic_read32(addr)?;
            ctx.fpr[ins.rd() as usize] = f32::from_bits(bits) as f64;
            Flow::Next
        }
        Opcode::Lfd => {
            let addr = effective_d(ctx, ins);
            let bits = map.generic_read64(addr)?;
            ctx.fpr[ins.rd() as usize] = f64::from_bits(bits);
            Flow::Next
        }
        Opcode::Stfs => {
            let addr = effective_d(ctx, ins);
            let bits = (ctx.fpr[ins.rs() as usize] as f32).to_bits();
            map.generic_write32(addr, bits)?;
            Flow::Next
        }
        Opcode::Stfd => {
            let addr = effective_d(ctx, ins);
            let bits = ctx.fpr[ins.rs() as usize].to_bits();
            map.generic_write64(addr, bits)?;
            Flow::Next
        }
        Opcode::FAdd => fpbinop(ctx, ins, |a, b| a + b),
        Opcode::FSub => fpbinop(ctx, ins, |a, b| a - b),
        Opcode::FMul => fpmulop(ctx, ins, |a, b| a * b),
        Opcode::FDiv => fpbinop(ctx, ins, |a, b| a / b),
        Opcode::FMr => {
            ctx.fpr[ins.rd() as usize] = ctx.fpr[ins.rb() as usize];
            Flow::Next
        }
        Opcode::FNeg => {
            ctx.fpr[ins.rd() as usize] = -ctx.fpr[ins.rb() as usize];
            Flow::Next
        }
        Opcode::FAbs => {
            ctx.fpr[ins.rd() as usize] = ctx.fpr[ins.rb() as usize].abs();
            Flow::Next
        }
        Opcode::FCmpU => {
            let a = ctx.fpr[ins.ra() as usize];
            let b = ctx.fpr[ins.rb() as usize];
            let cond = if a.is_nan() || b.is_nan() {
                Cond::default().with_so(true)
            } else {
                Cond::default().with_lt(a < b).with_gt(a > b).with_eq(a == b)
            };
            ctx.cr = ctx.cr.with_field(7 - ins.crf_d(), cond);
            Flow::Next
        }
        Opcode::Frsp => {
            ctx.fpr[ins.rd() as usize] = ctx.fpr[ins.rb() as usize] as f32 as f64;
            Flow::Next
        }
        Opcode::FctiWz => {
            let value = ctx.fpr[ins.rb() as usize];
            let truncated = value.trunc().clamp(i32::MIN as f64, i32::MAX as f64) as i32;
            ctx.fpr[ins.rd() as usize] = f64::from_bits(truncated as u32 as u64);
            Flow::Next
        }
        Opcode::Mffs => {
            ctx.fpr[ins.rd() as usize] = f64::from_bits(ctx.fpscr as u64);
            Flow::Next
        }
        Opcode::Mtfsf => {
            ctx.fpscr = ctx.fpr[ins.rb() as usize].to_bits() as u32;
            Flow::Next
        }
    };

    let _ = model;
    Ok((flow, 1))
}

fn bitwise(ctx: &mut Context, ins: Ins, op: impl Fn(u32, u32) -> u32) -> Flow {
    let result = op(gpr(ctx, ins.rs()), gpr(ctx, ins.rb()));
    set_gpr(ctx, ins.ra(), result);
    if ins.rc() {
        update_cr0(ctx, result as i32);
    }
    Flow::Next
}

fn shift(ctx: &mut Context, ins: Ins, op: impl Fn(u32, u32) -> u32) -> Flow {
    let result = op(gpr(ctx, ins.rs()), gpr(ctx, ins.rb()) & 0x3F);
    set_gpr(ctx, ins.ra(), result);
    if ins.rc() {
        update_cr0(ctx, result as i32);
    }
    Flow::Next
}

fn write_cmp(ctx: &mut Context, crf: u8, ordering: std::cmp::Ordering, so: bool) {
    use std::cmp::Ordering::*;
    let cond = Cond::default()
        .with_lt(ordering == Less)
        .with_gt(ordering == Greater)
        .with_eq(ordering == Equal)
        .with_so(so);
    ctx.cr = ctx.cr.with_field(7 - crf, cond);
}

fn effective_d(ctx: &Context, ins: Ins) -> Address {
    let base = if ins.ra() == 0 { 0 } else { gpr(ctx, ins.ra()) };
    Address(base) + ins.simm()
}

fn effective_x(ctx: &Context, ins: Ins) -> Address {
    let base = if ins.ra() == 0 { 0 } else { gpr(ctx, ins.ra()) };
    Address(base.wrapping_add(gpr(ctx, ins.rb())))
}

fn branch_target(pc: Address, disp: i32, absolute: bool) -> Address {
    if absolute { Address(disp as u32) } else { pc + disp }
}

/// Evaluates the `BO`/`BI` branch-conditional predicate (CTR decrement and
/// the `BO[2]` "ignore condition" bit included).
fn branch_taken(ctx: &mut Context, bo: u8, bi: u8) -> bool {
    let decrement_ctr = bo & 0b00100 == 0;
    let ctr_ok = if decrement_ctr {
        ctx.ctr = ctx.ctr.wrapping_sub(1);
        let ctr_zero = ctx.ctr == 0;
        if bo & 0b00010 == 0 { ctr_zero } else { !ctr_zero }
    } else {
        true
    };

    let ignore_cond = bo & 0b10000 != 0;
    let cond_ok = if ignore_cond {
        true
    } else {
        let field = ctx.cr.field(7 - (bi / 4));
        let bit_set = match bi % 4 {
            0 => field.lt(),
            1 => field.gt(),
            2 => field.eq(),
            _ => field.so(),
        };
        let want_set = bo & 0b01000 != 0;
        bit_set == want_set
    };

    ctr_ok && cond_ok
}

fn read_spr(ctx: &Context, number: u16) -> u32 {
    match SPR::from_number(number) {
        Some(SPR::Lr) => ctx.lr,
        Some(SPR::Ctr) => ctx.ctr,
        Some(SPR::Xer) => ctx.xer.to_bits(),
        Some(SPR::Tbl) => ctx.timebase_lower(),
        Some(SPR::Tbu) => ctx.timebase_upper(),
        Some(SPR::Dec) => ctx.decrementer,
        Some(other) => ctx.spr[other as usize],
        None => ctx.spr[number as usize],
    }
}

fn write_spr(ctx: &mut Context, number: u16, value: u32) {
    match SPR::from_number(number) {
        Some(SPR::Lr) => ctx.lr = value,
        Some(SPR::Ctr) => ctx.ctr = value,
        Some(SPR::Xer) => ctx.xer = ppc_arch::registers::XerReg::from_bits(value),
        Some(SPR::Dec) => ctx.set_decrementer(value),
        Some(other) => ctx.spr[other as usize] = value,
        None => ctx.spr[number as usize] = value,
    }
}

fn fpbinop(ctx: &mut Context, ins: Ins, op: impl Fn(f64, f64) -> f64) -> Flow {
    let a = ctx.fpr[ins.ra() as usize];
    let b = ctx.fpr[ins.rb() as usize];
    ctx.fpr[ins.rd() as usize] = op(a, b);
    Flow::Next
}

/// `fmul`'s third operand is `frC` (bits 10..6), not `frB` (bits 15..11) —
/// the A-form encoding's odd one out among the instructions this dispatch
/// handles.
fn fpmulop(ctx: &mut Context, ins: Ins, op: impl Fn(f64, f64) -> f64) -> Flow {
    let a = ctx.fpr[ins.ra() as usize];
    let c = ctx.fpr[ins.frc() as usize];
    ctx.fpr[ins.rd() as usize] = op(a, c);
    Flow::Next
}

fn load32(ctx: &mut Context, map: &MemoryMap, ins: Ins) -> Result<Flow, Error> {
    let addr = effective_d(ctx, ins);
    let value = map.generic_read32(addr)?;
    set_gpr(ctx, ins.rd(), value);
    Ok(Flow::Next)
}

fn load32x(ctx: &mut Context, map: &MemoryMap, ins: Ins, byte_reversed: bool) -> Result<Flow, Error> {
    let addr = effective_x(ctx, ins);
    let mut value = map.generic_read32(addr)?;
    if byte_reversed {
        value = value.swap_bytes();
    }
    set_gpr(ctx, ins.rd(), value);
    Ok(Flow::Next)
}

fn load16(ctx: &mut Context, map: &MemoryMap, ins: Ins) -> Result<Flow, Error> {
    let addr = effective_d(ctx, ins);
    let value = map.generic_read16(addr)?;
    set_gpr(ctx, ins.rd(), value as u32);
    Ok(Flow::Next)
}

fn load16x(ctx: &mut Context, map: &MemoryMap, ins: Ins, byte_reversed: bool) -> Result<Flow, Error> {
    let addr = effective_x(ctx, ins);
    let mut value = map.generic_read16(addr)?;
    if byte_reversed {
        value = value.swap_bytes();
    }
    set_gpr(ctx, ins.rd(), value as u32);
    Ok(Flow::Next)
}

fn load8(ctx: &mut Context, map: &MemoryMap, ins: Ins) -> Result<Flow, Error> {
    let addr = effective_d(ctx, ins);
    let value = map.generic_read8(addr)?;
    set_gpr(ctx, ins.rd(), value as u32);
    Ok(Flow::Next)
}

fn load8x(ctx: &mut Context, map: &MemoryMap, ins: Ins) -> Result<Flow, Error> {
    let addr = effective_x(ctx, ins);
    let value = map.generic_read8(addr)?;
    set_gpr(ctx, ins.rd(), value as u32);
    Ok(Flow::Next)
}

fn store32(ctx: &mut Context, map: &MemoryMap, ins: Ins) -> Result<Flow, Error> {
    let addr = effective_d(ctx, ins);
    map.generic_write32(addr, gpr(ctx, ins.rs()))?;
    Ok(Flow::Next)
}

fn store32x(ctx: &mut Context, map: &MemoryMap, ins: Ins) -> Result<Flow, Error> {
    let addr = effective_x(ctx, ins);
    map.generic_write32(addr, gpr(ctx, ins.rs()))?;
    Ok(Flow::Next)
}

fn store16(ctx: &mut Context, map: &MemoryMap, ins: Ins) -> Result<Flow, Error> {
    let addr = effective_d(ctx, ins);
    map.generic_write16(addr, gpr(ctx, ins.rs()) as u16)?;
    Ok(Flow::Next)
}

fn store16x(ctx: &mut Context, map: &MemoryMap, ins: Ins) -> Result<Flow, Error> {
    let addr = effective_x(ctx, ins);
    map.generic_write16(addr, gpr(ctx, ins.rs()) as u16)?;
    Ok(Flow::Next)
}

fn store8(ctx: &mut Context, map: &MemoryMap, ins: Ins) -> Result<Flow, Error> {
    let addr = effective_d(ctx, ins);
    map.generic_write8(addr, gpr(ctx, ins.rs()) as u8)?;
    Ok(Flow::Next)
}

fn store8x(ctx: &mut Context, map: &MemoryMap, ins: Ins) -> Result<Flow, Error> {
    let addr = effective_x(ctx, ins);
    map.generic_write8(addr, gpr(ctx, ins.rs()) as u8)?;
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryMapConfig, MemoryRegion, Range};

    fn whole_address_space_map(buf: &mut [u8]) -> MemoryMap {
        let range = Range { start: 0, end: buf.len() as u32 };
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

    /// `addi r3, 0, 42` then `addi r4, r3, 8`: the §8 "hello world" style
    /// straight-line arithmetic path.
    #[test]
    fn addi_chain() {
        let mut buf = [0u8; 64];
        let map = whole_address_space_map(&mut buf);
        let mut ctx = Context::default();

        let addi = |rd: u8, ra: u8, simm: u16| (14u32 << 26) | ((rd as u32) << 21) | ((ra as u32) << 16) | simm as u32;

        let (flow, _) = step(&mut ctx, &map, Model::Sixxx, Ins::new(addi(3, 0, 42))).unwrap();
        assert_eq!(flow, Flow::Next);
        assert_eq!(gpr(&ctx, 3), 42);

        let (_, _) = step(&mut ctx, &map, Model::Sixxx, Ins::new(addi(4, 3, 8))).unwrap();
        assert_eq!(gpr(&ctx, 4), 50);
    }

    #[test]
    fn unconditional_branch_is_taken() {
        let mut buf = [0u8; 64];
        let map = whole_address_space_map(&mut buf);
        let mut ctx = Context::default();
        ctx.pc = Address(0x1000);

        // b +0x20 (relative)
        let word = (18u32 << 26) | (0x20u32 >> 2 << 2);
        let (flow, _) = step(&mut ctx, &map, Model::Sixxx, Ins::new(word)).unwrap();
        assert_eq!(flow, Flow::Jump(Address(0x1020)));
    }

    #[test]
    fn sc_surfaces_as_syscall_flow() {
        let mut buf = [0u8; 64];
        let map = whole_address_space_map(&mut buf);
        let mut ctx = Context::default();
        let (flow, _) = step(&mut ctx, &map, Model::Sixxx, Ins::new(17u32 << 26)).unwrap();
        assert_eq!(flow, Flow::Syscall);
    }
}
