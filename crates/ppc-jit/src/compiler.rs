//! Cranelift setup: ISA selection, codegen settings and the block function
//! signature. Grounded on the source's `Compiler::new` (same setting
//! sequence), but using a plain `CallConv::SystemV` block signature instead
//! of `CallConv::Tail` — this back-end never jumps directly between two
//! compiled blocks the way the source's trace-linked trampoline does, so
//! the tail convention buys nothing here.

use std::sync::Arc;

use cranelift::codegen;
use cranelift::codegen::isa::{CallConv, TargetIsa};
use cranelift::native;
use cranelift::prelude::{AbiParam, Configurable, Signature};

/// Host-tunable knobs carried through from [`crate::JitConfig`]; kept
/// separate from the codegen `Flags` the way the source keeps `Settings`
/// apart from its Cranelift setting string table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Settings {
    /// Skip emitting the profiling-hook call even when the engine was
    /// built with profiling enabled; has no effect here, profiling is
    /// entirely a `ppc-core` call-site concern (see `DESIGN.md`).
    pub _reserved: (),
}

pub(crate) struct Compiler {
    pub isa: Arc<dyn TargetIsa>,
}

impl Compiler {
    pub fn new(_settings: Settings) -> Self {
        let opt_level = "speed_and_size";
        let verifier = if cfg!(debug_assertions) { "true" } else { "false" };

        let mut codegen_settings = codegen::settings::builder();
        codegen_settings.set("preserve_frame_pointers", "true").unwrap();
        codegen_settings.set("use_colocated_libcalls", "false").unwrap();
        codegen_settings.set("is_pic", "false").unwrap();
        codegen_settings.set("stack_switch_model", "basic").unwrap();
        codegen_settings.set("unwind_info", "false").unwrap();
        codegen_settings.set("opt_level", opt_level).unwrap();
        codegen_settings.set("enable_verifier", verifier).unwrap();
        codegen_settings.enable("enable_alias_analysis").unwrap();

        let isa_builder = native::builder().unwrap_or_else(|msg| {
            panic!("host machine is not supported by cranelift: {msg}");
        });

        let isa = isa_builder
            .finish(codegen::settings::Flags::new(codegen_settings))
            .expect("host ISA settings are self-consistent");

        Self { isa }
    }

    /// Two pointers in, nothing out: `(ctx: *mut Context, hooks: *const Hooks)`.
    pub fn block_signature(&self) -> Signature {
        let ptr = self.isa.pointer_type();
        Signature {
            params: vec![AbiParam::new(ptr), AbiParam::new(ptr)],
            returns: vec![],
            call_conv: CallConv::SystemV,
        }
    }

    /// `(map/ctx: *const T, addr: u32, [value: T,] fault: *mut Fault) [-> T]`
    /// shaped signature for a hook trampoline, built per call site in
    /// `lower.rs` since width and read/write direction vary.
    pub fn hook_signature(&self, params: Vec<AbiParam>, returns: Vec<AbiParam>) -> Signature {
        Signature { params, returns, call_conv: CallConv::SystemV }
    }
}
