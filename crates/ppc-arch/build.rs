//! Generates the exhaustive 65536-entry primary-opcode/extended-opcode
//! decode table at build time, so a single array index replaces the linear
//! descriptor scan on every fetch.
//!
//! `descriptors.rs` is compiled twice on purpose (see its module doc): once
//! as part of the crate, once standalone here via `#[path]`, so this script
//! has no dependency on the rest of the crate (and in particular cannot
//! accidentally depend on something not yet built).

use std::{env, fs, path::Path};

#[path = "src/descriptors.rs"]
mod descriptors;

fn main() {
    println!("cargo::rerun-if-changed=src/descriptors.rs");

    let mut entries = Vec::with_capacity(1 << 16);
    for index in 0..=u16::MAX {
        let opcode = descriptors::Opcode::find_match(index).unwrap_or(descriptors::Opcode::Illegal);
        entries.push(format!("Opcode::{opcode:?}"));
    }

    let body = entries.join(", ");
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR set by cargo");
    let dest = Path::new(&out_dir).join("decode_table.rs");
    fs::write(
        dest,
        format!("pub static DECODE_TABLE: [Opcode; 65536] = [{body}];\n"),
    )
    .expect("failed to write generated decode table");
}
