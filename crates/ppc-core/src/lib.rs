//! Top-level control: the tiered dispatch loop, the basic-block directory,
//! the decoder that feeds the JIT, and the host-facing configuration and
//! error types tying the other five crates in this workspace together.
//!
//! Grounded on `cores/src/cpu/jit.rs` for the directory/hooks wiring and
//! the overall `Engine` shape, and on `toplevel.c`/`bblookup.c` from
//! `original_source/` for the tiered dispatch loop itself — see
//! `DESIGN.md` for the full ledger.

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod translate;

pub use config::Config;
pub use directory::{BlockInfo, Directory, DirectoryLayout, PagedDirectory};
pub use engine::Engine;
pub use error::Error;
