//! Host-supplied configuration for [`crate::Engine::new`].

use std::num::NonZeroU32;

use ppc_arch::Model;
use ppc_interp::MemoryMapConfig;

use crate::directory::{Directory, DirectoryLayout};

/// Everything needed to construct an [`crate::Engine`]: directory shape,
/// cache sizing, the model variant and the memory map.
///
/// Not `Clone`/`Debug`: the directory override is a trait object and the
/// memory map carries host closures, neither of which can derive either in
/// general.
pub struct Config {
    /// `None` selects the default [`crate::directory::PagedDirectory`]; a
    /// host-supplied implementation must satisfy the [`Directory`] trait in
    /// full — there is no partial-override surface.
    pub directory: Option<Box<dyn Directory>>,
    pub native_cache_size: usize,
    pub native_cache_guard: usize,
    /// Initial capacity hint for the per-block IR node buffer. Unlike the
    /// native code cache this isn't raw mmap'd memory — IR nodes are plain,
    /// droppable Rust values reused from block to block, not executable
    /// bytes — so this only sizes a `Vec::with_capacity` call (see
    /// `DESIGN.md`).
    pub intermediate_cache_size: usize,
    pub intermediate_cache_guard: usize,
    /// `1` translates on first execution.
    pub hot_threshold: NonZeroU32,
    pub directory_layout: DirectoryLayout,
    pub mmap: MemoryMapConfig,
    /// Bypasses the directory and emitter entirely; every block always
    /// interprets.
    pub interpret_only: bool,
    pub model: Model,
}
