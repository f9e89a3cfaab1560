//! The middle-end: a per-basic-block intermediate representation with
//! inline constant folding on encode and a single dead-code-elimination
//! pass at block end.
//!
//! Grounded on the source's `middle/ir.c`: same instruction set, same
//! fold-on-encode discipline, same tail-to-head liveness sweep — re-shaped
//! as an index-addressed slab (see [`node::IrNode`]'s doc) instead of a
//! pointer-linked list.

pub mod builder;
mod dce;
pub mod node;

pub use builder::Builder;
pub use node::{Condition, IrNode, IrOp, Operand, OperandSize};
