//! Instruction descriptors: mask/pattern pairs matched against the 16-bit
//! `(primary_opcode << 10) | extended_opcode` dispatch index.
//!
//! This module is compiled twice: once as part of the crate, and once
//! standalone by `build.rs` to generate the exhaustive 65536-entry decode
//! table. It must not depend on anything else in the crate.

/// A decoded instruction family. Each variant carries its own decode and
/// interpret behavior (see `ppc-interp`), replacing the function-pointer
/// dispatch tables of the system this core is extracted from with tagged
/// variants indexed the same way.
///
/// This is a representative subset of the 6xx/Gekko instruction set —
/// enough to interpret and translate real basic blocks end to end. Adding
/// an instruction means adding one variant and one [`Descriptor`]; the
/// matching and uniqueness-verification machinery does not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::VariantArray)]
#[allow(clippy::upper_case_acronyms)]
pub enum Opcode {
    Illegal,

    AddI,
    AddIS,
    Ori,
    OrIs,
    XorI,
    XorIS,
    AndIDot,
    AndISDot,
    CmpI,
    CmpLI,

    Add,
    SubF,
    And,
    Or,
    Xor,
    Nor,
    Cmp,
    CmpL,
    Slw,
    Srw,
    Sraw,
    SrawI,
    CntlzW,
    RlwiNM,

    Lwz,
    Stw,
    Lhz,
    Sth,
    Lbz,
    Stb,
    Lwzx,
    Stwx,
    Lbzx,
    Stbx,
    Lhzx,
    Sthx,
    LwBrx,
    StwBrx,
    LhBrx,
    SthBrx,
    Lwarx,
    Stwcx,

    B,
    Bc,
    Bclr,
    Bcctr,

    Mfspr,
    Mtspr,
    Mfmsr,
    Mtmsr,
    Mfcr,
    Mtcrf,
    Sc,
    Rfi,
    Isync,
    Sync,
    Eieio,

    Lfs,
    Lfd,
    Stfs,
    Stfd,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FMr,
    FNeg,
    FAbs,
    FCmpU,
    Frsp,
    FctiWz,
    Mffs,
    Mtfsf,
}

/// A mask/match descriptor against the 16-bit dispatch index.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    pub opcode: Opcode,
    pub mask: u16,
    pub pattern: u16,
}

impl Descriptor {
    #[inline]
    pub const fn matches(self, index: u16) -> bool {
        index & self.mask == self.pattern
    }
}

/// Mask selecting only the 6-bit primary opcode field of the dispatch index.
const PRIMARY_MASK: u16 = 0b1111_1100_0000_0000;

const fn primary_only(opcode: Opcode, primary: u16) -> Descriptor {
    Descriptor {
        opcode,
        mask: PRIMARY_MASK,
        pattern: primary << 10,
    }
}

const fn primary_extended(opcode: Opcode, primary: u16, extended: u16) -> Descriptor {
    Descriptor {
        opcode,
        mask: 0xFFFF,
        pattern: (primary << 10) | extended,
    }
}

/// Mask for A-form floating-point instructions (`fadd`, `fsub`, `fmul`,
/// `fdiv`): the "extended opcode" is only the low 5 bits of the 10-bit
/// extended field (instruction bits 5..1); bits 10..6 hold the `frC`
/// operand register, not part of the opcode.
const A_FORM_MASK: u16 = PRIMARY_MASK | 0b1_1111;

const fn primary_aform(opcode: Opcode, primary: u16, xo: u16) -> Descriptor {
    Descriptor {
        opcode,
        mask: A_FORM_MASK,
        pattern: (primary << 10) | xo,
    }
}

/// Every instruction descriptor. Order does not affect correctness (§8
/// Property 1 requires at most one match per index); [`Opcode::find_match`]
/// just needs *a* deterministic scan order.
pub const DESCRIPTORS: &[Descriptor] = &[
    primary_only(Opcode::AddI, 14),
    primary_only(Opcode::AddIS, 15),
    primary_only(Opcode::Ori, 24),
    primary_only(Opcode::OrIs, 25),
    primary_only(Opcode::XorI, 26),
    primary_only(Opcode::XorIS, 27),
    primary_only(Opcode::AndIDot, 28),
    primary_only(Opcode::AndISDot, 29),
    primary_only(Opcode::CmpI, 11),
    primary_only(Opcode::CmpLI, 10),
    primary_only(Opcode::RlwiNM, 21),
    primary_only(Opcode::Lwz, 32),
    primary_only(Opcode::Stw, 36),
    primary_only(Opcode::Lhz, 40),
    primary_only(Opcode::Sth, 44),
    primary_only(Opcode::Lbz, 34),
    primary_only(Opcode::Stb, 38),
    primary_only(Opcode::B, 18),
    primary_only(Opcode::Bc, 16),
    primary_only(Opcode::Sc, 17),
    primary_extended(Opcode::Cmp, 31, 0),
    primary_extended(Opcode::Add, 31, 266),
    primary_extended(Opcode::SubF, 31, 40),
    primary_extended(Opcode::And, 31, 28),
    primary_extended(Opcode::Or, 31, 444),
    primary_extended(Opcode::Xor, 31, 316),
    primary_extended(Opcode::Nor, 31, 124),
    primary_extended(Opcode::CmpL, 31, 32),
    primary_extended(Opcode::Slw, 31, 24),
    primary_extended(Opcode::Srw, 31, 536),
    primary_extended(Opcode::Sraw, 31, 792),
    primary_extended(Opcode::SrawI, 31, 824),
    primary_extended(Opcode::CntlzW, 31, 26),
    primary_extended(Opcode::LwBrx, 31, 534),
    primary_extended(Opcode::StwBrx, 31, 662),
    primary_extended(Opcode::LhBrx, 31, 790),
    primary_extended(Opcode::SthBrx, 31, 918),
    primary_extended(Opcode::Lwzx, 31, 23),
    primary_extended(Opcode::Stwx, 31, 151),
    primary_extended(Opcode::Lbzx, 31, 87),
    primary_extended(Opcode::Stbx, 31, 215),
    primary_extended(Opcode::Lhzx, 31, 279),
    primary_extended(Opcode::Sthx, 31, 407),
    primary_extended(Opcode::Lwarx, 31, 20),
    primary_extended(Opcode::Stwcx, 31, 150),
    primary_extended(Opcode::Mfspr, 31, 339),
    primary_extended(Opcode::Mtspr, 31, 467),
    primary_extended(Opcode::Mfmsr, 31, 83),
    primary_extended(Opcode::Mtmsr, 31, 146),
    primary_extended(Opcode::Mfcr, 31, 19),
    primary_extended(Opcode::Mtcrf, 31, 144),
    primary_extended(Opcode::Sync, 31, 598),
    primary_extended(Opcode::Eieio, 31, 854),
    primary_extended(Opcode::Bclr, 19, 16),
    primary_extended(Opcode::Bcctr, 19, 528),
    primary_extended(Opcode::Rfi, 19, 50),
    primary_extended(Opcode::Isync, 19, 150),

    primary_only(Opcode::Lfs, 48),
    primary_only(Opcode::Lfd, 50),
    primary_only(Opcode::Stfs, 52),
    primary_only(Opcode::Stfd, 54),
    primary_aform(Opcode::FDiv, 63, 18),
    primary_aform(Opcode::FSub, 63, 20),
    primary_aform(Opcode::FAdd, 63, 21),
    primary_aform(Opcode::FMul, 63, 25),
    primary_extended(Opcode::FCmpU, 63, 0),
    primary_extended(Opcode::Frsp, 63, 12),
    primary_extended(Opcode::FctiWz, 63, 15),
    primary_extended(Opcode::FNeg, 63, 40),
    primary_extended(Opcode::FMr, 63, 72),
    primary_extended(Opcode::FAbs, 63, 264),
    primary_extended(Opcode::Mffs, 63, 583),
    primary_extended(Opcode::Mtfsf, 63, 711),
];

impl Opcode {
    /// Finds the (at most one, per §8 Property 1) descriptor matching
    /// `index`, or `None` if the index is illegal.
    pub fn find_match(index: u16) -> Option<Self> {
        DESCRIPTORS
            .iter()
            .find(|descriptor| descriptor.matches(index))
            .map(|descriptor| descriptor.opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::VariantArray;

    /// §8 Property 1: for every 16-bit dispatch index, at most one
    /// descriptor matches.
    #[test]
    fn descriptors_are_mutually_exclusive() {
        for index in 0..=u16::MAX {
            let matches: Vec<_> = DESCRIPTORS
                .iter()
                .filter(|d| d.matches(index))
                .collect();
            assert!(
                matches.len() <= 1,
                "index {index:#06x} matched {} descriptors: {matches:?}",
                matches.len()
            );
        }
    }

    #[test]
    fn every_descriptor_is_reachable() {
        for descriptor in DESCRIPTORS {
            assert_eq!(Opcode::find_match(descriptor.pattern), Some(descriptor.opcode));
        }
    }

    #[test]
    fn every_non_illegal_variant_has_a_descriptor() {
        for opcode in Opcode::VARIANTS {
            if *opcode == Opcode::Illegal {
                continue;
            }
            assert!(
                DESCRIPTORS.iter().any(|d| d.opcode == *opcode),
                "{opcode:?} has no descriptor"
            );
        }
    }
}
