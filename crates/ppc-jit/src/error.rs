use easyerr::Error;

/// An empty block, a code-cache exhaustion, or a Cranelift verifier/codegen
/// failure.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("block contains no must-emit instructions")]
    EmptyBlock,
    #[error(transparent)]
    OutOfMemory { source: jit_arena::ArenaError },
    #[error(transparent)]
    Codegen {
        source: cranelift_codegen::CodegenError,
    },
}

impl From<jit_arena::ArenaError> for BuildError {
    fn from(source: jit_arena::ArenaError) -> Self {
        BuildError::OutOfMemory { source }
    }
}

impl From<cranelift_codegen::CodegenError> for BuildError {
    fn from(source: cranelift_codegen::CodegenError) -> Self {
        BuildError::Codegen { source }
    }
}
