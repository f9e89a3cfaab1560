//! Cached instruction fetch: the step loop re-resolves which fetch region
//! covers `pc` only when `pc` leaves the previously resolved region, rather
//! than scanning the fetch table on every single instruction.

use ppc_arch::{Address, Ins, Primitive};

use crate::{
    error::{Error, RuntimeError},
    memory::{MemoryMap, RegionBody},
};

enum Strategy {
    /// Instructions are fetched straight from host memory. `base` points at
    /// the byte backing `region_start`; `native_endian` is false when the
    /// buffer needs a byte swap per word (`big_endian != host endian`).
    Buffer { base: *const u8, len: usize, native_endian: bool },
    Handler,
}

/// A one-entry cache of "which fetch region currently covers the program
/// counter", invalidated whenever `pc` falls outside its range.
pub struct FetchCursor {
    region_start: u32,
    region_end: u32,
    strategy: Strategy,
    valid: bool,
}

impl Default for FetchCursor {
    fn default() -> Self {
        Self {
            region_start: 0,
            region_end: 0,
            strategy: Strategy::Handler,
            valid: false,
        }
    }
}

#[cfg(target_endian = "little")]
const HOST_IS_BIG_ENDIAN: bool = false;
#[cfg(target_endian = "big")]
const HOST_IS_BIG_ENDIAN: bool = true;

impl FetchCursor {
    fn covers(&self, addr: u32) -> bool {
        self.valid && (self.region_start..self.region_end).contains(&addr)
    }

    /// Re-resolves the cache against `map` for `pc`, if it doesn't already
    /// cover it.
    fn refresh(&mut self, map: &MemoryMap, pc: u32) -> Result<(), Error> {
        if self.covers(pc) {
            return Ok(());
        }

        let region = map
            .find_fetch_region(pc)
            .ok_or(Error::Runtime { source: RuntimeError::BadAddress { address: Address(pc) } })?;

        self.region_start = region.range.start;
        self.region_end = region.range.end;
        self.strategy = match &region.body {
            RegionBody::Buffer { ptr, len, big_endian, .. } => Strategy::Buffer {
                base: *ptr,
                len: *len,
                native_endian: *big_endian == HOST_IS_BIG_ENDIAN,
            },
            RegionBody::Handler { .. } => Strategy::Handler,
        };
        self.valid = true;
        Ok(())
    }

    /// Fetches the instruction word at `pc`, refreshing the cached region
    /// first if needed.
    pub fn fetch(&mut self, map: &MemoryMap, pc: Address) -> Result<Ins, Error> {
        let value = pc.value();
        if !value.is_multiple_of(4) {
            return Err(Error::Runtime { source: RuntimeError::UnalignedFetch { address: pc } });
        }

        self.refresh(map, value)?;

        let word = match &self.strategy {
            Strategy::Buffer { base, len, native_endian } => {
                let offset = (value - self.region_start) as usize;
                // SAFETY: `offset` is within `[0, region_end - region_start)`
                // by construction of `refresh`, and the region table's
                // invariant is that `len` covers that whole span.
                let bytes = unsafe { std::slice::from_raw_parts(base.add(offset.min(*len)), (*len).saturating_sub(offset)) };
                if *native_endian {
                    u32::read_ne_bytes(bytes)
                } else {
                    u32::read_ne_bytes(bytes).swap_bytes()
                }
            }
            Strategy::Handler => map.generic_read32(pc)?,
        };

        Ok(Ins::new(word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryMapConfig, MemoryRegion, Range};

    #[test]
    fn fetches_big_endian_word() {
        let mut buf = [0u8; 8];
        0x1234_5678u32.write_be_bytes(&mut buf[4..]);
        let range = Range { start: 0x1000, end: 0x1008 };
        let map = MemoryMap::new(MemoryMapConfig {
            fetch: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
            read8: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
            read16: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
            read32: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
            write8: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
            write16: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
            write32: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
        })
        .unwrap();

        let mut cursor = FetchCursor::default();
        let ins = cursor.fetch(&map, Address(0x1004)).unwrap();
        assert_eq!(ins.0, 0x1234_5678);
    }

    #[test]
    fn unaligned_fetch_is_rejected() {
        let mut buf = [0u8; 4];
        let range = Range { start: 0x1000, end: 0x1004 };
        let map = MemoryMap::new(MemoryMapConfig {
            fetch: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
            read8: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
            read16: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
            read32: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
            write8: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
            write16: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
            write32: vec![MemoryRegion::buffer(range, &mut buf, true, false)],
        })
        .unwrap();

        let mut cursor = FetchCursor::default();
        let result = cursor.fetch(&map, Address(0x1001));
        assert!(matches!(result, Err(Error::Runtime { source: RuntimeError::UnalignedFetch { .. } })));
    }
}
