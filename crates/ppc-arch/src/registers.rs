use bitos::bitos;
use strum::{FromRepr, VariantArray};

/// A general-purpose register index (`r0`..`r31`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, VariantArray)]
#[repr(u8)]
pub enum GPR {
    R0, R1, R2, R3, R4, R5, R6, R7,
    R8, R9, R10, R11, R12, R13, R14, R15,
    R16, R17, R18, R19, R20, R21, R22, R23,
    R24, R25, R26, R27, R28, R29, R30, R31,
}

impl GPR {
    /// # Panics
    /// Panics if `index > 31`.
    #[inline(always)]
    pub fn new(index: u8) -> Self {
        Self::from_repr(index).expect("gpr index out of range")
    }
}

/// A floating-point register index (`f0`..`f31`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, VariantArray)]
#[repr(u8)]
pub enum FPR {
    R0, R1, R2, R3, R4, R5, R6, R7,
    R8, R9, R10, R11, R12, R13, R14, R15,
    R16, R17, R18, R19, R20, R21, R22, R23,
    R24, R25, R26, R27, R28, R29, R30, R31,
}

impl FPR {
    /// # Panics
    /// Panics if `index > 31`.
    #[inline(always)]
    pub fn new(index: u8) -> Self {
        Self::from_repr(index).expect("fpr index out of range")
    }
}

/// A special-purpose register, covering the subset the front-end special
/// cases (`mfspr`/`mtspr` on every other number passes straight through the
/// flat `spr` file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, VariantArray)]
#[repr(u16)]
pub enum SPR {
    Xer = 1,
    Lr = 8,
    Ctr = 9,
    Dsisr = 18,
    Dar = 19,
    Dec = 22,
    Sdr1 = 25,
    Srr0 = 26,
    Srr1 = 27,
    Sprg0 = 272,
    Sprg1 = 273,
    Sprg2 = 274,
    Sprg3 = 275,
    Tbl = 284,
    Tbu = 285,
    Pvr = 287,
    Ibat0U = 528,
    Ibat0L = 529,
    Ibat1U = 530,
    Ibat1L = 531,
    Ibat2U = 532,
    Ibat2L = 533,
    Ibat3U = 534,
    Ibat3L = 535,
    Dbat0U = 536,
    Dbat0L = 537,
    Dbat1U = 538,
    Dbat1L = 539,
    Dbat2U = 540,
    Dbat2L = 541,
    Dbat3U = 542,
    Dbat3L = 543,
    Hid0 = 1008,
    Hid1 = 1009,
}

impl SPR {
    pub fn from_number(number: u16) -> Option<Self> {
        Self::from_repr(number)
    }
}

/// One condition-register field (`cr0`..`cr7`), each a nibble.
///
/// Note: architecturally `cr0` is the *last* field in the big-endian bit
/// numbering PowerPC uses for the 32-bit `CR`, i.e. its bits are the most
/// significant nibble.
#[bitos(4)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cond {
    #[bits(0)]
    pub so: bool,
    #[bits(1)]
    pub eq: bool,
    #[bits(2)]
    pub gt: bool,
    #[bits(3)]
    pub lt: bool,
}

/// The 32-bit condition register, eight [`Cond`] fields.
///
/// `bitos` lays array element 0 out at the least-significant bits. PowerPC
/// numbers `CR0` as the architecturally first (most-significant) field, so
/// `CR0` actually lives at `fields()[7]`, not `fields()[0]` — PPC bit order
/// is big-endian.
#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CondReg {
    #[bits(..)]
    pub fields: [Cond; 8],
}

impl CondReg {
    #[inline(always)]
    pub fn field(self, index: u8) -> Cond {
        self.fields()[index as usize]
    }

    #[inline(always)]
    pub fn with_field(self, index: u8, value: Cond) -> Self {
        let mut fields = self.fields();
        fields[index as usize] = value;
        self.with_fields(fields)
    }
}

/// The fixed-point exception register.
#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XerReg {
    #[bits(0..7)]
    pub transfer_count: u8,
    #[bits(29)]
    pub carry: bool,
    #[bits(30)]
    pub overflow: bool,
    #[bits(31)]
    pub summary_overflow: bool,
}

/// The machine state register. Layout matches the architectural bit
/// numbering (bit 0 = MSB), expressed here little-endian-first as `bitos`
/// requires, with fields named after the architectural mnemonic they gate.
#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineState {
    #[bits(0)]
    pub little_endian: bool,
    #[bits(1)]
    pub recoverable_exception: bool,
    #[bits(4)]
    pub data_addr_translation: bool,
    #[bits(5)]
    pub instr_addr_translation: bool,
    #[bits(6)]
    pub exception_prefix: bool,
    #[bits(11)]
    pub float_exception_mode_1: bool,
    #[bits(12)]
    pub machine_check: bool,
    #[bits(13)]
    pub float_available: bool,
    #[bits(14)]
    pub single_step_trace: bool,
    /// Branch Trace Enable (`BE`). Real architectural bit 9 (`0x200`), per
    /// `examples/original_source/m3/drppc/front/powerpc/6xx.c`/`internal.h`.
    #[bits(9)]
    pub branch_trace: bool,
    #[bits(16)]
    pub float_exception_mode_0: bool,
    #[bits(17)]
    pub user_mode: bool,
    /// External Interrupt Enable (`EE`). Real architectural bit 15
    /// (`0x8000`) — `6xx.c:188` tests `MSR & 0x8000` directly.
    #[bits(15)]
    pub external_interrupts: bool,
    #[bits(25)]
    pub exception_little_endian: bool,
}

impl Default for MachineState {
    fn default() -> Self {
        // matches the 6xx/Gekko reset value (0x40): exception_prefix set,
        // everything else clear.
        Self::from_bits(0x40)
    }
}

static_assertions::assert_eq_size!(CondReg, u32);
static_assertions::assert_eq_size!(XerReg, u32);
static_assertions::assert_eq_size!(MachineState, u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cond_reg_field_order_matches_architectural_layout() {
        // CR0 (architectural field 0) lives at array index 7, the most
        // significant nibble.
        let cr = CondReg::from_bits(0).with_field(7, Cond::default().with_lt(true));
        assert_eq!(cr.to_bits() & 0xF000_0000, 0x8000_0000);

        // index 0 is the least significant nibble (architectural CR7).
        let cr = CondReg::from_bits(0).with_field(0, Cond::default().with_lt(true));
        assert_eq!(cr.to_bits() & 0xF, 0x8);
    }

    #[test]
    fn machine_state_default_matches_reset_value() {
        assert_eq!(MachineState::default().to_bits(), 0x40);
    }
}
