use crate::address::Address;

/// Which PowerPC variant an engine instance is configured for.
///
/// `Sixxx`/`Gekko` are the fully-implemented, fully-exercised models (see
/// `DESIGN.md`'s decision on Open Question 1); `FourXx` is modeled
/// structurally (distinct vectors and register set) but its model-specific
/// opcode extensions are not implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Sixxx,
    Gekko,
    FourXx,
}

/// The reset/exception vector set for a [`Model`].
#[derive(Debug, Clone, Copy)]
pub struct Vectors {
    pub reset: Address,
    pub external_low: Address,
    pub external_high: Address,
    pub decrementer_low: Address,
    pub decrementer_high: Address,
}

impl Model {
    pub fn vectors(self) -> Vectors {
        match self {
            Model::Sixxx => Vectors {
                reset: Address(0xFFF0_0100),
                external_low: Address(0x0000_0500),
                external_high: Address(0xFFF0_0500),
                decrementer_low: Address(0x0000_0900),
                decrementer_high: Address(0xFFF0_0900),
            },
            // the Gekko front-end relocates the high vectors into the
            // 0x8000_xxxx window rather than 0xFFF0_xxxx; this mirrors the
            // "hack" the source carries for this model.
            Model::Gekko => Vectors {
                reset: Address(0xFFF0_0100),
                external_low: Address(0x0000_0500),
                external_high: Address(0x8000_0500),
                decrementer_low: Address(0x0000_0900),
                decrementer_high: Address(0x8000_0900),
            },
            Model::FourXx => Vectors {
                reset: Address(0xFFFF_FFFC),
                external_low: Address(0xFF80_0500),
                external_high: Address(0xFF80_0500),
                decrementer_low: Address(0xFF80_0900),
                decrementer_high: Address(0xFF80_0900),
            },
        }
    }
}
