//! Maps every architectural [`DFlowReg`] to its byte-level home inside
//! [`Context`], computed with `offset_of!` rather than the source's runtime
//! pointer-array lookup (`cpu->register_pointers[reg]`).
//!
//! Scratch temporaries never get a context home: they live only as
//! Cranelift SSA values for the lifetime of the block being lowered, so the
//! allocator handles them and nothing here needs to spill them.

use core::mem::offset_of;
use ppc_arch::DFlowReg;
use ppc_interp::Context;

/// `Context::pc` isn't part of the `DFlowReg` space (the data-flow graph
/// never treats the program counter as a value to fold or eliminate), so
/// `Branch`/`BCond` lowering addresses it through this constant directly.
pub const PC_OFFSET: i32 = offset_of!(Context, pc) as i32;

/// Where a [`DFlowReg`] physically lives, as seen by the lowering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Home {
    /// A full 32-bit context slot (GPR, LR, CTR).
    Word32 { offset: i32 },
    /// A full 64-bit context slot (an FPR).
    Fpr64 { offset: i32 },
    /// A sub-range of bits within a packed 32-bit context slot (a CR flag
    /// nibble bit or an XER flag), read/written with a load-mask-store or
    /// load-mask-or-store sequence.
    SubWord32 { offset: i32, bit_lo: u8, bit_width: u8 },
    /// A block-scoped scratch value; never spilled to `Context`.
    Scratch,
    /// A back-end native register; no encoder currently targets this.
    Unsupported,
}

/// Looks up `reg`'s home. `CrBit(n)` recovers the architectural field number
/// (`n / 4`) and flag (`n % 4`), then remaps to `CondReg`'s storage nibble —
/// field 0 (architectural `cr0`) lives in the most-significant nibble, the
/// reverse of `bitos`'s array order (see `ppc_arch::registers::CondReg`).
pub fn home(reg: DFlowReg) -> Home {
    match reg {
        DFlowReg::Gpr(g) => Home::Word32 { offset: (offset_of!(Context, gpr) + g as usize * 4) as i32 },
        DFlowReg::Fpr(f) => Home::Fpr64 { offset: (offset_of!(Context, fpr) + f as usize * 8) as i32 },
        DFlowReg::Lr => Home::Word32 { offset: offset_of!(Context, lr) as i32 },
        DFlowReg::Ctr => Home::Word32 { offset: offset_of!(Context, ctr) as i32 },
        DFlowReg::CrBit(bit) => {
            let field = bit / 4;
            let flag = bit % 4;
            let packed_bit = (7 - field) * 4 + flag;
            Home::SubWord32 { offset: offset_of!(Context, cr) as i32, bit_lo: packed_bit, bit_width: 1 }
        }
        DFlowReg::XerSo => Home::SubWord32 { offset: offset_of!(Context, xer) as i32, bit_lo: 31, bit_width: 1 },
        DFlowReg::XerOv => Home::SubWord32 { offset: offset_of!(Context, xer) as i32, bit_lo: 30, bit_width: 1 },
        DFlowReg::XerCa => Home::SubWord32 { offset: offset_of!(Context, xer) as i32, bit_lo: 29, bit_width: 1 },
        DFlowReg::XerCount => Home::SubWord32 { offset: offset_of!(Context, xer) as i32, bit_lo: 0, bit_width: 7 },
        DFlowReg::Temp(_) => Home::Scratch,
        DFlowReg::Native(_) => Home::Unsupported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppc_arch::registers::GPR;

    #[test]
    fn distinct_gprs_get_distinct_offsets() {
        let Home::Word32 { offset: r0 } = home(DFlowReg::Gpr(GPR::R0)) else { panic!() };
        let Home::Word32 { offset: r1 } = home(DFlowReg::Gpr(GPR::R1)) else { panic!() };
        assert_eq!(r1 - r0, 4);
    }

    /// Architectural `cr0` (field 0) is the most-significant nibble, bits
    /// 28..=31; its `so` flag (flag 0) is bit 28.
    #[test]
    fn cr0_so_lands_in_top_nibble() {
        let Home::SubWord32 { bit_lo, .. } = home(DFlowReg::CrBit(0)) else { panic!() };
        assert_eq!(bit_lo, 28);
    }

    /// Architectural `cr7` (field 7) is the least-significant nibble.
    #[test]
    fn cr7_lt_lands_in_bottom_nibble() {
        let Home::SubWord32 { bit_lo, .. } = home(DFlowReg::CrBit(7 * 4 + 3)) else { panic!() };
        assert_eq!(bit_lo, 3);
    }

    #[test]
    fn temporaries_have_no_context_home() {
        assert_eq!(home(DFlowReg::Temp(0)), Home::Scratch);
    }
}
