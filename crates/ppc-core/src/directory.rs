//! The basic-block directory: maps a PC to the [`BlockInfo`] tracking how
//! often it has run and, once hot, its compiled native code.
//!
//! Grounded on the source's `bblookup.c`: a three-level paged table
//! (`ignore | page1 | page2 | offset` split of the address) with pages
//! allocated lazily on first touch, exactly like `HandleLv1PageFault`/
//! `HandleLv2PageFault`/`HandleBBMiss`. The C source's raw pointer-array
//! pages become `Box<[Option<Box<[BlockInfo]>>]>` here — still lazily
//! allocated, but host-tracked rather than hand-managed.

use ppc_arch::Address;
use ppc_jit::Block;

use crate::error::Error;

/// Per-address execution bookkeeping the directory hands back on every
/// lookup.
#[derive(Default)]
pub struct BlockInfo {
    /// Number of times this address has been dispatched to while
    /// untranslated. Saturates at `u32::MAX` rather than wrapping.
    pub count: u32,
    /// The compiled block, once `count` reached the engine's hot threshold
    /// and translation succeeded.
    pub native: Option<Block>,
    /// Number of PowerPC instructions the native block (if any) covers;
    /// used to size the self-modifying-code invalidation sweep.
    pub length: u32,
}

impl BlockInfo {
    pub(crate) fn bump(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }
}

/// The directory contract: translate a PC into a mutable [`BlockInfo`] slot,
/// and forget every slot on demand. A host may substitute a custom
/// implementation (e.g. backed by a hash map rather than a paged table) by
/// implementing this trait in full — there is no partial-override surface.
pub trait Directory {
    fn lookup(&mut self, addr: Address) -> Result<&mut BlockInfo, Error>;
    fn invalidate(&mut self);
}

/// How an [`Address`] splits into a [`PagedDirectory`]'s three levels:
/// `ignore | page1 | page2 | offset`, low bit first.
///
/// Validated at construction: every field's bit width must be non-zero
/// (other than `ignore_bits`, which may be zero) and the four widths must
/// sum to exactly `address_bits`, which itself must not exceed 32 — the
/// same shift/mask consistency check `BBLookup_Setup` performs.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryLayout {
    pub address_bits: u8,
    pub ignore_bits: u8,
    pub offs_bits: u8,
    pub page2_bits: u8,
    pub page1_bits: u8,
}

impl Default for DirectoryLayout {
    /// 32-bit address space, word-aligned (`ignore_bits = 2`), a 4096-entry
    /// leaf page (`offs_bits = 12`) and an even split of the remaining bits
    /// between the two upper levels.
    fn default() -> Self {
        Self { address_bits: 32, ignore_bits: 2, offs_bits: 12, page2_bits: 9, page1_bits: 9 }
    }
}

impl DirectoryLayout {
    fn validate(self) -> Result<(), Error> {
        if self.address_bits > 32 {
            return Err(Error::InvalidConfig { reason: format!("address_bits {} exceeds 32", self.address_bits) });
        }
        let sum = self.ignore_bits as u32 + self.offs_bits as u32 + self.page2_bits as u32 + self.page1_bits as u32;
        if sum != self.address_bits as u32 {
            return Err(Error::InvalidConfig {
                reason: format!("directory layout bits sum to {sum}, expected address_bits {}", self.address_bits),
            });
        }
        if self.offs_bits == 0 || self.page2_bits == 0 || self.page1_bits == 0 {
            return Err(Error::InvalidConfig { reason: "offs_bits, page2_bits and page1_bits must be non-zero".into() });
        }
        Ok(())
    }

    fn split(self, addr: Address) -> (usize, usize, usize) {
        let shifted = addr.value() >> self.ignore_bits;
        let offset = (shifted & mask(self.offs_bits)) as usize;
        let page2 = ((shifted >> self.offs_bits) & mask(self.page2_bits)) as usize;
        let page1 = ((shifted >> (self.offs_bits + self.page2_bits)) & mask(self.page1_bits)) as usize;
        (page1, page2, offset)
    }
}

fn mask(bits: u8) -> u32 {
    if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 }
}

type Leaf = Box<[BlockInfo]>;
type Page2 = Box<[Option<Leaf>]>;

/// The default three-level paged [`Directory`]. Every level past the first
/// is allocated lazily, so a sparsely-executed address space (the common
/// case for a ROM with large unused regions) costs memory proportional to
/// what was actually run, not to `address_bits`.
pub struct PagedDirectory {
    layout: DirectoryLayout,
    page1_len: usize,
    page2_len: usize,
    leaf_len: usize,
    top: Vec<Option<Page2>>,
}

impl PagedDirectory {
    pub fn new(layout: DirectoryLayout) -> Result<Self, Error> {
        layout.validate()?;
        let page1_len = 1usize << layout.page1_bits;
        let page2_len = 1usize << layout.page2_bits;
        let leaf_len = 1usize << layout.offs_bits;

        Ok(Self {
            layout,
            page1_len,
            page2_len,
            leaf_len,
            top: (0..page1_len).map(|_| None).collect(),
        })
    }
}

impl Directory for PagedDirectory {
    fn lookup(&mut self, addr: Address) -> Result<&mut BlockInfo, Error> {
        if self.layout.address_bits < 32 && (addr.value() >> self.layout.address_bits) != 0 {
            return Err(Error::BadPC { address: addr });
        }

        let (page1, page2, offset) = self.layout.split(addr);
        debug_assert!(page1 < self.page1_len);

        let level2 = self.top[page1].get_or_insert_with(|| (0..self.page2_len).map(|_| None).collect());
        let leaf = level2[page2].get_or_insert_with(|| (0..self.leaf_len).map(|_| BlockInfo::default()).collect());

        Ok(&mut leaf[offset])
    }

    fn invalidate(&mut self) {
        for slot in &mut self.top {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_layout_not_summing_to_address_bits() {
        let layout = DirectoryLayout { address_bits: 32, ignore_bits: 2, offs_bits: 12, page2_bits: 9, page1_bits: 8 };
        assert!(matches!(PagedDirectory::new(layout), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn lookup_is_stable_across_calls() {
        let mut dir = PagedDirectory::new(DirectoryLayout::default()).unwrap();
        dir.lookup(Address(0x1000)).unwrap().count = 3;
        assert_eq!(dir.lookup(Address(0x1000)).unwrap().count, 3);
    }

    #[test]
    fn bump_saturates_count() {
        let mut info = BlockInfo { count: u32::MAX, native: None, length: 0 };
        assert_eq!(info.bump(), u32::MAX);
    }

    #[test]
    fn invalidate_clears_native_pointers() {
        let mut dir = PagedDirectory::new(DirectoryLayout::default()).unwrap();
        dir.lookup(Address(0x2000)).unwrap().count = 5;
        dir.invalidate();
        assert_eq!(dir.lookup(Address(0x2000)).unwrap().count, 0);
    }

    #[test]
    fn lookup_rejects_addresses_above_address_bits() {
        // A 24-bit layout: 0xFFFF_FFFF has bits set above bit 23, so it
        // must be rejected as BadPC rather than silently masked down.
        let layout = DirectoryLayout { address_bits: 24, ignore_bits: 2, offs_bits: 12, page2_bits: 5, page1_bits: 5 };
        let mut dir = PagedDirectory::new(layout).unwrap();
        assert!(matches!(dir.lookup(Address(0xFFFF_FFFF)), Err(Error::BadPC { .. })));
        // An in-range address through the same layout still succeeds.
        assert!(dir.lookup(Address(0x00AB_CDEF & 0x00FF_FFFF)).is_ok());
    }

    #[test]
    fn distinct_addresses_in_different_pages_are_independent() {
        let mut dir = PagedDirectory::new(DirectoryLayout::default()).unwrap();
        dir.lookup(Address(0x0000_1000)).unwrap().count = 1;
        dir.lookup(Address(0x1000_0000)).unwrap().count = 2;
        assert_eq!(dir.lookup(Address(0x0000_1000)).unwrap().count, 1);
        assert_eq!(dir.lookup(Address(0x1000_0000)).unwrap().count, 2);
    }
}
