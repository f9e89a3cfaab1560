//! Trampolines into the memory map and the timebase: the fixed-ABI call
//! targets emitted code reaches through [`Hooks`], addressed by
//! `offset_of!` the same way [`crate::context_layout`] addresses `Context`.
//!
//! Grounded on the source's `builder/memory.rs` (`ContextHooks` + the
//! `offset_of!`-addressed function-pointer slots), adapted to call through
//! to `ppc-interp`'s [`MemoryMap`] and [`Context::advance`] instead of a
//! C `Hooks` vtable.

use ppc_arch::Address;
use ppc_interp::{Context, MemoryMap};

/// Out-parameter a hook trampoline fills in if the memory map has no region
/// covering the accessed address. A JIT-compiled block cannot propagate a
/// `Result` across a Cranelift call boundary, so a fault is recorded here
/// instead of aborting the block in place; the engine checks it once the
/// block returns and turns it into `Error::Runtime`.
///
/// This is a deliberate translate-tier simplification: a fault partway
/// through a block does not stop the remaining instructions the way the
/// interpreter's `?` does (see `DESIGN.md`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Fault {
    pub faulted: bool,
    pub address: u32,
}

impl Fault {
    pub fn take(&mut self) -> Option<Address> {
        self.faulted.then(|| Address(self.address))
    }
}

macro_rules! read_trampoline {
    ($name:ident, $method:ident, $ty:ty) => {
        pub extern "C" fn $name(map: *const MemoryMap, addr: u32, fault: *mut Fault) -> $ty {
            let map = unsafe { &*map };
            match map.$method(Address(addr)) {
                Ok(value) => value,
                Err(_) => {
                    unsafe {
                        (*fault).faulted = true;
                        (*fault).address = addr;
                    }
                    <$ty>::default()
                }
            }
        }
    };
}

macro_rules! write_trampoline {
    ($name:ident, $method:ident, $ty:ty) => {
        pub extern "C" fn $name(map: *const MemoryMap, addr: u32, value: $ty, fault: *mut Fault) {
            let map = unsafe { &*map };
            if map.$method(Address(addr), value).is_err() {
                unsafe {
                    (*fault).faulted = true;
                    (*fault).address = addr;
                }
            }
        }
    };
}

read_trampoline!(read8, generic_read8, u8);
read_trampoline!(read16, generic_read16, u16);
read_trampoline!(read32, generic_read32, u32);
read_trampoline!(read64, generic_read64, u64);
write_trampoline!(write8, generic_write8, u8);
write_trampoline!(write16, generic_write16, u16);
write_trampoline!(write32, generic_write32, u32);
write_trampoline!(write64, generic_write64, u64);

pub extern "C" fn advance(ctx: *mut Context, cycles: u32) {
    unsafe { (*ctx).advance(cycles) };
}

type ReadFn<T> = extern "C" fn(*const MemoryMap, u32, *mut Fault) -> T;
type WriteFn<T> = extern "C" fn(*const MemoryMap, u32, T, *mut Fault);

/// The fixed-ABI call table a compiled block is handed alongside its
/// `Context` pointer. One instance is built per [`crate::Jit`] and reused
/// across every block it compiles and runs.
#[repr(C)]
pub struct Hooks {
    pub map: *const MemoryMap,
    pub fault: *mut Fault,
    pub read8: ReadFn<u8>,
    pub read16: ReadFn<u16>,
    pub read32: ReadFn<u32>,
    pub read64: ReadFn<u64>,
    pub write8: WriteFn<u8>,
    pub write16: WriteFn<u16>,
    pub write32: WriteFn<u32>,
    pub write64: WriteFn<u64>,
    pub advance: extern "C" fn(*mut Context, u32),
}

impl Hooks {
    pub fn new(map: *const MemoryMap, fault: *mut Fault) -> Self {
        Self {
            map,
            fault,
            read8: read8,
            read16: read16,
            read32: read32,
            read64: read64,
            write8: write8,
            write16: write16,
            write32: write32,
            write64: write64,
            advance,
        }
    }
}
