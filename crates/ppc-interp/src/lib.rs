//! The front-end: the host-programmable memory map, cached instruction
//! fetch, the CPU context, and a single-instruction interpreter sufficient
//! to execute any basic block (and the tier every block starts in before
//! it gets hot enough to translate).

pub mod context;
pub mod error;
pub mod fetch;
pub mod interp;
pub mod irq;
pub mod memory;
pub mod timebase;

pub use context::Context;
pub use error::{Error, RuntimeError};
pub use fetch::FetchCursor;
pub use interp::{Flow, step};
pub use irq::check_irqs;
pub use memory::{MemoryMap, MemoryMapConfig, MemoryRegion, Range};
