//! The flat "DFLOW" register-identity space used by the intermediate
//! representation's data-flow vectors.
//!
//! Every value an IR node can read or write — a condition-register flag, an
//! XER flag, a GPR, `LR`/`CTR`, an FPR, a scratch temporary, or a back-end
//! native register — gets one bit position in this space. The layout is
//! part of the wire contract: `dflow_in`/`dflow_out` bit positions are only
//! meaningful relative to this enumeration's order.

use crate::registers::{FPR, GPR};
use strum::VariantArray as _;

/// Number of CR flag bits (8 fields × 4 flags).
pub const CR_BIT_COUNT: usize = 32;
/// Number of XER flag bits this engine tracks individually (`so`, `ov`,
/// `ca`, and the byte/transfer count field as a single flow-tracked unit).
pub const XER_FLAG_COUNT: usize = 4;
/// Number of scratch IR temporaries.
pub const TEMP_COUNT: usize = 8;
/// Number of native (host) general-purpose registers the back-end may use
/// as a register-allocation target in the future; reserved but currently
/// always context-memory-resident.
pub const NATIVE_COUNT: usize = 16;

const CR_BASE: usize = 0;
const XER_BASE: usize = CR_BASE + CR_BIT_COUNT;
const GPR_BASE: usize = XER_BASE + XER_FLAG_COUNT;
const LR_INDEX: usize = GPR_BASE + 32;
const CTR_INDEX: usize = LR_INDEX + 1;
const FPR_BASE: usize = CTR_INDEX + 1;
const TEMP_BASE: usize = FPR_BASE + 32;
const NATIVE_BASE: usize = TEMP_BASE + TEMP_COUNT;

/// Total number of bits in the DFLOW space.
pub const DFLOW_COUNT: usize = NATIVE_BASE + NATIVE_COUNT;

const WORDS: usize = DFLOW_COUNT.div_ceil(64);

/// A single addressable value in the DFLOW space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DFlowReg {
    /// One of the 32 condition-register flag bits (`field * 4 + flag`,
    /// `flag` in `{so,eq,gt,lt}` order matching [`crate::registers::Cond`]).
    CrBit(u8),
    XerSo,
    XerOv,
    XerCa,
    XerCount,
    Gpr(GPR),
    Lr,
    Ctr,
    Fpr(FPR),
    /// A scratch temporary, scoped to the basic block currently being
    /// encoded. Not live across block boundaries.
    Temp(u8),
    /// A back-end native register; reserved for a future allocator.
    Native(u8),
}

impl DFlowReg {
    /// Flat bit index of this register within [`DFlowSet`].
    pub fn index(self) -> usize {
        match self {
            Self::CrBit(bit) => {
                assert!((bit as usize) < CR_BIT_COUNT);
                CR_BASE + bit as usize
            }
            Self::XerSo => XER_BASE,
            Self::XerOv => XER_BASE + 1,
            Self::XerCa => XER_BASE + 2,
            Self::XerCount => XER_BASE + 3,
            Self::Gpr(gpr) => GPR_BASE + gpr as usize,
            Self::Lr => LR_INDEX,
            Self::Ctr => CTR_INDEX,
            Self::Fpr(fpr) => FPR_BASE + fpr as usize,
            Self::Temp(n) => {
                assert!((n as usize) < TEMP_COUNT);
                TEMP_BASE + n as usize
            }
            Self::Native(n) => {
                assert!((n as usize) < NATIVE_COUNT);
                NATIVE_BASE + n as usize
            }
        }
    }
}

/// A fixed-size bit-vector over the DFLOW space, used for `dflow_in`,
/// `dflow_out`, and the dead-code-elimination live-out mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DFlowSet([u64; WORDS]);

impl DFlowSet {
    pub const EMPTY: Self = Self([0; WORDS]);

    #[inline]
    pub fn set(&mut self, reg: DFlowReg) {
        let idx = reg.index();
        self.0[idx / 64] |= 1 << (idx % 64);
    }

    #[inline]
    pub fn clear(&mut self, reg: DFlowReg) {
        let idx = reg.index();
        self.0[idx / 64] &= !(1 << (idx % 64));
    }

    #[inline]
    pub fn contains(&self, reg: DFlowReg) -> bool {
        let idx = reg.index();
        self.0[idx / 64] & (1 << (idx % 64)) != 0
    }

    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = [0u64; WORDS];
        for i in 0..WORDS {
            out[i] = self.0[i] | other.0[i];
        }
        Self(out)
    }

    #[inline]
    pub fn intersection(&self, other: &Self) -> Self {
        let mut out = [0u64; WORDS];
        for i in 0..WORDS {
            out[i] = self.0[i] & other.0[i];
        }
        Self(out)
    }

    #[inline]
    pub fn difference(&self, other: &Self) -> Self {
        let mut out = [0u64; WORDS];
        for i in 0..WORDS {
            out[i] = self.0[i] & !other.0[i];
        }
        Self(out)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        !self.intersection(other).is_empty()
    }

    /// All bits that are architectural (not a scratch temporary or a
    /// native register), used to seed the dead-code-elimination live-out
    /// mask: temporaries and native registers die at block end.
    pub fn default_search_mask() -> Self {
        let mut set = Self::EMPTY;
        for bit in 0..CR_BIT_COUNT as u8 {
            set.set(DFlowReg::CrBit(bit));
        }
        set.set(DFlowReg::XerSo);
        set.set(DFlowReg::XerOv);
        set.set(DFlowReg::XerCa);
        set.set(DFlowReg::XerCount);
        for gpr in GPR::VARIANTS.iter().copied() {
            set.set(DFlowReg::Gpr(gpr));
        }
        set.set(DFlowReg::Lr);
        set.set(DFlowReg::Ctr);
        for fpr in FPR::VARIANTS.iter().copied() {
            set.set(DFlowReg::Fpr(fpr));
        }
        set
    }

    /// Bits that are always safe to drop from `dflow_out` once they're not
    /// in the live-out mask: every condition-register and XER flag, since
    /// they're architecturally reconstructed by the next compare rather
    /// than carried forward.
    pub fn removable_mask() -> Self {
        let mut set = Self::EMPTY;
        for bit in 0..CR_BIT_COUNT as u8 {
            set.set(DFlowReg::CrBit(bit));
        }
        set.set(DFlowReg::XerSo);
        set.set(DFlowReg::XerOv);
        set.set(DFlowReg::XerCa);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::GPR;

    #[test]
    fn distinct_registers_get_distinct_indices() {
        assert_ne!(DFlowReg::Gpr(GPR::R0).index(), DFlowReg::Gpr(GPR::R1).index());
        assert_ne!(DFlowReg::Lr.index(), DFlowReg::Ctr.index());
        assert_ne!(DFlowReg::CrBit(0).index(), DFlowReg::XerSo.index());
    }

    #[test]
    fn set_operations_round_trip() {
        let mut set = DFlowSet::EMPTY;
        set.set(DFlowReg::Gpr(GPR::R3));
        assert!(set.contains(DFlowReg::Gpr(GPR::R3)));
        set.clear(DFlowReg::Gpr(GPR::R3));
        assert!(!set.contains(DFlowReg::Gpr(GPR::R3)));
    }

    #[test]
    fn temporaries_are_excluded_from_default_search_mask() {
        let search = DFlowSet::default_search_mask();
        assert!(!search.contains(DFlowReg::Temp(0)));
        assert!(search.contains(DFlowReg::Gpr(GPR::R0)));
    }
}
