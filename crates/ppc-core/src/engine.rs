//! The top-level engine: owns the context, memory map, BB directory and
//! JIT, and implements the tiered dispatch loop tying them together.
//!
//! Grounded on `cores/src/cpu/jit.rs`'s `Core`: the same
//! interpret-until-hot, chain-native-blocks-while-available shape, adapted
//! to this crate's `Directory`/`Block`/`step` primitives in place of that
//! file's `Blocks`/raw function pointers/hand-written interpreter loop.

use ppc_arch::{Address, Model, registers::SPR};
use ppc_interp::{Context, Flow, FetchCursor, MemoryMap, RuntimeError};
use ppc_jit::{CodeCacheConfig, Fault, Hooks, Jit, Settings};
use ppc_ir::Builder;

use crate::config::Config;
use crate::directory::{Directory, PagedDirectory};
use crate::error::Error;
use crate::translate;

/// What [`Engine::advance_through_directory`] accomplished this call: either
/// nothing was hot enough to run natively (the caller must interpret one
/// instruction itself), or one or more native blocks ran and already moved
/// `pc` and consumed cycles.
enum DirectoryOutcome {
    FellThrough,
    RanNative,
}

/// Owns one PowerPC execution context and drives it forward in `run`-sized
/// timeslices, promoting hot addresses to native code as it goes.
///
/// Single-threaded by construction (see `DESIGN.md`'s §5 notes): nothing
/// here is `Send`/`Sync`, and nothing needs to be — an `Engine` is meant to
/// be owned by the one thread driving the emulated CPU.
pub struct Engine {
    context: Context,
    map: MemoryMap,
    fetch: FetchCursor,
    directory: Box<dyn Directory>,
    jit: Jit,
    /// Reused across every translation; `begin_block` resets it rather than
    /// allocating fresh storage per compile.
    builder: Builder,
    hot_threshold: u32,
    interpret_only: bool,
    model: Model,
    breakpoint: Option<Address>,
    irq_callback: Option<Box<dyn FnMut() -> u32>>,
    /// Host-facing cycle budget for the in-progress (or most recent)
    /// `run` call; distinct from `Context::timebase`, which tracks
    /// architectural time rather than the host's dispatch budget.
    cycles_remaining: i64,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self, Error> {
        let map = MemoryMap::new(config.mmap)?;

        let directory: Box<dyn Directory> = match config.directory {
            Some(directory) => directory,
            None => Box::new(PagedDirectory::new(config.directory_layout)?),
        };

        let jit = Jit::new(
            Settings::default(),
            CodeCacheConfig { size: config.native_cache_size, guard: config.native_cache_guard },
        )?;

        let node_capacity = config.intermediate_cache_size / std::mem::size_of::<ppc_ir::IrNode>().max(1);

        Ok(Self {
            context: Context::default(),
            map,
            fetch: FetchCursor::default(),
            directory,
            jit,
            builder: Builder::with_capacity(node_capacity),
            hot_threshold: config.hot_threshold.get(),
            interpret_only: config.interpret_only,
            model: config.model,
            breakpoint: None,
            irq_callback: None,
            cycles_remaining: 0,
        })
    }

    /// Resets the context to its power-on state, sets `PVR`, installs the
    /// IRQ callback and redirects `pc` to the model's reset vector.
    /// Invalidates the directory: a fresh context invalidates every cached
    /// translation's assumptions about what's resident at each address.
    pub fn setup_context(&mut self, pvr: u32, irq_callback: Option<Box<dyn FnMut() -> u32>>) -> Result<(), Error> {
        self.context = Context::default();
        self.context.spr[SPR::Pvr as usize] = pvr;
        self.context.pc = self.model.vectors().reset;
        self.irq_callback = irq_callback;
        self.directory.invalidate();
        self.cycles_remaining = 0;
        Ok(())
    }

    /// Resets the context and every engine-owned cache, preserving `PVR`
    /// and the installed IRQ callback (matching the source's `Reset`, which
    /// re-seeds the CPU but not the host-supplied configuration).
    pub fn reset(&mut self) -> Result<(), Error> {
        let pvr = self.context.spr[SPR::Pvr as usize];
        self.context = Context::default();
        self.context.spr[SPR::Pvr as usize] = pvr;
        self.context.pc = self.model.vectors().reset;
        self.fetch = FetchCursor::default();
        self.directory.invalidate();
        self.jit.reset_cache();
        self.cycles_remaining = 0;
        Ok(())
    }

    /// Runs up to `cycles` cycles, returning how many were actually
    /// consumed. This can exceed `cycles` when the last dispatched
    /// instruction or native block overshoots the remaining budget (a
    /// multi-cycle op or a translated block is never split mid-way); it is
    /// less than `cycles` only if a breakpoint was hit first.
    pub fn run(&mut self, cycles: u64) -> Result<u64, Error> {
        let requested = cycles as i64;
        self.cycles_remaining = requested;

        while self.cycles_remaining > 0 {
            let pc_before = self.context.pc;

            match self.advance_through_directory()? {
                DirectoryOutcome::RanNative => {}
                DirectoryOutcome::FellThrough => {
                    let cost = self.interpret_step()?;
                    self.cycles_remaining -= cost as i64;
                    self.poll_irqs();
                }
            }

            if Some(self.context.pc) == self.breakpoint {
                break;
            }

            // A `step`/native call that neither advanced `pc` nor consumed
            // cycles would spin the budget forever; this can't currently
            // happen (every opcode either charges a cycle or is `Illegal`,
            // which errors), but guards the loop against a future opcode
            // that slips through with a zero cost.
            if self.context.pc == pc_before && self.cycles_remaining == requested {
                break;
            }
        }

        Ok((requested - self.cycles_remaining) as u64)
    }

    /// Drives the directory/native-promotion side of dispatch: bumps the
    /// current address's hit count, compiles it once it crosses
    /// `hot_threshold`, and chains through as many already-native blocks in
    /// a row as are available before falling back to the interpreter.
    fn advance_through_directory(&mut self) -> Result<DirectoryOutcome, Error> {
        if self.interpret_only {
            return Ok(DirectoryOutcome::FellThrough);
        }

        let mut ran_native = false;

        loop {
            let addr = self.context.pc;

            enum Action {
                JustTouched,
                RunNative,
                Cold,
            }

            let action = {
                let info = self.directory.lookup(addr)?;
                if info.count < self.hot_threshold {
                    if info.bump() == self.hot_threshold {
                        Action::JustTouched
                    } else {
                        Action::Cold
                    }
                } else if info.native.is_some() {
                    Action::RunNative
                } else {
                    Action::Cold
                }
            };

            match action {
                Action::JustTouched => {
                    self.compile_block(addr);
                    break;
                }
                Action::Cold => break,
                Action::RunNative => {
                    self.invoke_native(addr)?;
                    ran_native = true;
                    self.poll_irqs();
                    if self.cycles_remaining <= 0 || Some(self.context.pc) == self.breakpoint {
                        break;
                    }
                }
            }
        }

        Ok(if ran_native { DirectoryOutcome::RanNative } else { DirectoryOutcome::FellThrough })
    }

    /// Invokes the already-compiled block at `addr`, charging its fixed
    /// per-invocation cycle cost and surfacing a mid-block memory fault.
    fn invoke_native(&mut self, addr: Address) -> Result<(), Error> {
        let cycles = {
            let info = self.directory.lookup(addr)?;
            let block = info.native.as_ref().expect("caller only invokes when native.is_some()");

            let mut fault = Fault::default();
            let hooks = Hooks::new(&self.map as *const MemoryMap, &mut fault as *mut Fault);

            // SAFETY: `context` is exclusively owned by `self`; `hooks`
            // points at locals valid for the call. The code cache is only
            // ever reset alongside a `directory.invalidate()` that drops
            // every `Block` first, so a `Block` reachable through the
            // directory is always backed by live code.
            unsafe { block.call(&mut self.context as *mut Context, &hooks as *const Hooks) };

            if let Some(address) = fault.take() {
                return Err(Error::Runtime { source: RuntimeError::BadAddress { address } });
            }

            block.meta.cycles
        };

        self.cycles_remaining -= cycles as i64;
        Ok(())
    }

    /// Translates and compiles the block starting at `addr`, installing it
    /// into the directory on success. A compile failure is never fatal:
    /// `CompileError` leaves the slot untranslated (the block keeps
    /// interpreting), and `OutOfMemory` triggers the cache-overflow
    /// recovery protocol instead of propagating to the host.
    fn compile_block(&mut self, addr: Address) {
        match self.try_compile(addr) {
            Ok((block, length)) => {
                if let Ok(info) = self.directory.lookup(addr) {
                    info.native = Some(block);
                    info.length = length;
                }
            }
            Err(Error::OutOfMemory) => {
                tracing::warn!(address = %addr, "native code cache exhausted; invalidating directory and resetting cache");
                self.directory.invalidate();
                self.jit.reset_cache();
            }
            Err(err) => {
                tracing::debug!(address = %addr, error = %err, "block left untranslated; interpreting");
            }
        }
    }

    fn try_compile(&mut self, addr: Address) -> Result<(ppc_jit::Block, u32), Error> {
        let translated = {
            let map = &self.map;
            let fetch = &mut self.fetch;
            translate::decode(&mut self.builder, addr, move |a| fetch.fetch(map, a).ok().map(|ins| ins.0))?
        };

        let block = self.jit.compile(&translated.nodes, &self.map, translated.instruction_count)?;
        Ok((block, translated.instruction_count))
    }

    /// Interprets exactly one instruction at the current `pc`, updating
    /// `pc` per its [`Flow`] and advancing the timebase by its cost.
    fn interpret_step(&mut self) -> Result<u32, Error> {
        let pc = self.context.pc;
        let ins = self.fetch.fetch(&self.map, pc).map_err(|_| Error::BadPC { address: pc })?;

        let (flow, cost) = ppc_interp::step(&mut self.context, &self.map, self.model, ins)?;

        self.context.pc = match flow {
            Flow::Next | Flow::Syscall => pc + 4u32,
            Flow::Jump(target) => target,
        };
        self.context.advance(cost);

        Ok(cost)
    }

    /// Checks for a pending decrementer or external exception and, for an
    /// accepted external interrupt only, re-queries the host callback for
    /// the interrupt line's new level (a return of `0` auto-clears it).
    fn poll_irqs(&mut self) {
        let had_decrementer = self.context.dec_expired;
        let had_external = self.context.irq_pending;

        let taken = ppc_interp::check_irqs(&mut self.context, self.model);

        if taken && had_external && !had_decrementer {
            if let Some(callback) = &mut self.irq_callback {
                let level = callback();
                self.context.irq_pending = level != 0;
            }
        }
    }

    /// Extends the in-progress (or next) `run` timeslice by `n` cycles.
    pub fn add_cycles(&mut self, n: u64) {
        self.cycles_remaining = self.cycles_remaining.saturating_add(n as i64);
    }

    /// Forces `run` to exit at the next block boundary by zeroing the
    /// remaining budget.
    pub fn reset_cycles(&mut self) {
        self.cycles_remaining = 0;
    }

    pub fn cycles_left(&self) -> u64 {
        self.cycles_remaining.max(0) as u64
    }

    /// Sets the external interrupt line's level; any nonzero value is
    /// "asserted" (the architecture has no notion of interrupt priority
    /// beyond decrementer-vs-external, handled by [`Self::poll_irqs`]).
    pub fn set_irq_line(&mut self, state: u32) {
        self.context.irq_pending = state != 0;
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Bulk-replaces the context. The host must re-arm the memory map
    /// (there is no separate `MemoryMap::new` call implied here — construct
    /// a new `Engine` if the map itself needs to change) before the next
    /// `run`, matching the source's requirement to re-run `MMap_Setup`
    /// after `SetContext`.
    pub fn set_context(&mut self, context: &Context) {
        self.context = context.clone();
        self.fetch = FetchCursor::default();
    }

    pub fn set_breakpoint(&mut self, address: Option<Address>) {
        self.breakpoint = address;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryLayout;
    use ppc_interp::{MemoryMapConfig, MemoryRegion, Range};
    use std::num::NonZeroU32;

    fn leaked_ram(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; len].into_boxed_slice())
    }

    fn whole_space_config(buf: &'static mut [u8]) -> MemoryMapConfig {
        let range = Range { start: 0, end: buf.len() as u32 };

        let a: &'static mut [u8] = unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr(), buf.len()) };
        let b: &'static mut [u8] = unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr(), buf.len()) };
        let c: &'static mut [u8] = unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr(), buf.len()) };
        let d: &'static mut [u8] = unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr(), buf.len()) };
        let e: &'static mut [u8] = unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr(), buf.len()) };
        let f: &'static mut [u8] = unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr(), buf.len()) };
        let g: &'static mut [u8] = unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr(), buf.len()) };

        MemoryMapConfig {
            fetch: vec![MemoryRegion::buffer(range, a, true, false)],
            read8: vec![MemoryRegion::buffer(range, b, true, false)],
            read16: vec![MemoryRegion::buffer(range, c, true, false)],
            read32: vec![MemoryRegion::buffer(range, d, true, false)],
            write8: vec![MemoryRegion::buffer(range, e, true, false)],
            write16: vec![MemoryRegion::buffer(range, f, true, false)],
            write32: vec![MemoryRegion::buffer(range, g, true, false)],
        }
    }

    fn interpret_only_engine(buf: &'static mut [u8]) -> Engine {
        let config = Config {
            directory: None,
            native_cache_size: 1 << 20,
            native_cache_guard: 4096,
            intermediate_cache_size: 1 << 16,
            intermediate_cache_guard: 0,
            hot_threshold: NonZeroU32::new(1_000_000).unwrap(),
            directory_layout: DirectoryLayout::default(),
            mmap: whole_space_config(buf),
            interpret_only: true,
            model: Model::Sixxx,
        };
        Engine::new(config).unwrap()
    }

    /// Same as [`interpret_only_engine`], but with native compilation
    /// enabled and a hot threshold of 1, so the first touch of any address
    /// compiles it.
    fn jit_engine(buf: &'static mut [u8]) -> Engine {
        let config = Config {
            directory: None,
            native_cache_size: 1 << 20,
            native_cache_guard: 4096,
            intermediate_cache_size: 1 << 16,
            intermediate_cache_guard: 0,
            hot_threshold: NonZeroU32::new(1).unwrap(),
            directory_layout: DirectoryLayout::default(),
            mmap: whole_space_config(buf),
            interpret_only: false,
            model: Model::Sixxx,
        };
        Engine::new(config).unwrap()
    }

    /// Straight-line `addi` chain under `interpret_only`: every cycle is
    /// charged exactly once and `pc` lands where expected.
    #[test]
    fn interpret_only_runs_straight_line_code() {
        let buf = leaked_ram(64);
        let mut engine = interpret_only_engine(buf);

        let addi = |rd: u32, ra: u32, simm: u32| (14u32 << 26) | (rd << 21) | (ra << 16) | simm;
        let words = [addi(3, 0, 42), addi(4, 3, 8)];
        // Write the two instructions directly through the fetch region.
        for (i, word) in words.iter().enumerate() {
            let base = (i * 4) as u32;
            engine.map.generic_write32(Address(base), *word).unwrap();
        }

        engine.context.pc = Address(0);
        let consumed = engine.run(2).unwrap();
        assert!(consumed >= 2);
        assert_eq!(engine.context().gpr(ppc_arch::registers::GPR::R4), 50);
    }

    #[test]
    fn breakpoint_stops_run_early() {
        let buf = leaked_ram(64);
        let mut engine = interpret_only_engine(buf);
        engine.set_breakpoint(Some(Address(0)));
        engine.context.pc = Address(0);

        let consumed = engine.run(10).unwrap();
        assert_eq!(consumed, 0);
    }

    /// §8 Property 6: `requested - cycles_remaining == overrun`, with
    /// `overrun >= 0`, even when a single native block invocation charges
    /// more cycles than remained in the budget. A two-instruction tight
    /// loop (`addi`; `b` back to its own start, absolute) is compiled on
    /// first touch (`hot_threshold == 1`); the first `run` interprets its
    /// way around once (compiling both halves of the loop along the way),
    /// and the second `run`, given a budget of only 1 cycle, invokes the
    /// now-native two-cycle block whole and must report an overrun of 1
    /// rather than silently clamping to the requested budget.
    #[test]
    fn run_reports_overrun_past_the_requested_budget() {
        let buf = leaked_ram(64);
        let mut engine = jit_engine(buf);

        let addi = (14u32 << 26) | (3 << 21) | (0 << 16) | 1;
        // `b 0, AA=1` (LK=0): branch to absolute address 0.
        let b_abs_zero = (18u32 << 26) | (1 << 1);

        engine.map.generic_write32(Address(0), addi).unwrap();
        engine.map.generic_write32(Address(4), b_abs_zero).unwrap();

        engine.context.pc = Address(0);
        let first = engine.run(2).unwrap();
        assert_eq!(first, 2);
        assert_eq!(engine.context().pc, Address(0));

        let second = engine.run(1).unwrap();
        assert_eq!(second, 2, "the native block's 2-cycle cost should overrun a 1-cycle budget");
    }

    #[test]
    fn add_cycles_extends_the_budget() {
        let buf = leaked_ram(64);
        let mut engine = interpret_only_engine(buf);
        engine.context.pc = Address(0);
        engine.cycles_remaining = 0;
        engine.add_cycles(5);
        assert_eq!(engine.cycles_left(), 5);
    }

    #[test]
    fn reset_cycles_zeroes_the_budget_immediately() {
        let buf = leaked_ram(64);
        let mut engine = interpret_only_engine(buf);
        engine.cycles_remaining = 100;
        engine.reset_cycles();
        assert_eq!(engine.cycles_left(), 0);
    }

    #[test]
    fn set_context_round_trips_gprs() {
        let buf = leaked_ram(64);
        let mut engine = interpret_only_engine(buf);
        let mut ctx = engine.context().clone();
        ctx.set_gpr(ppc_arch::registers::GPR::R10, 0xDEAD_BEEF);
        engine.set_context(&ctx);
        assert_eq!(engine.context().gpr(ppc_arch::registers::GPR::R10), 0xDEAD_BEEF);
    }
}
