//! The engine's unified error type, aggregating every sub-crate's error.

use easyerr::Error as DeriveError;
use ppc_arch::Address;
use ppc_interp::RuntimeError;

/// Top-level error surfaced by [`crate::Engine`], matching `DRPPC_ERRNUM`'s
/// discriminants (see `DESIGN.md`).
#[derive(Debug, DeriveError)]
pub enum Error {
    /// Bad directory partitioning, a missing region table, or a missing
    /// callback. Surfaced only from `Engine::new`/`setup_context`/`reset`;
    /// fatal for the session.
    #[error("{reason}")]
    InvalidConfig { reason: String },
    /// An arena or directory-page allocation failed. `Engine::run` recovers
    /// from this automatically for the code-cache case (see §5 of
    /// `SPEC_FULL.md`); this variant only escapes to the host when recovery
    /// itself cannot proceed (e.g. the directory's own page allocator is
    /// exhausted).
    #[error("out of memory")]
    OutOfMemory,
    /// A branch or fetch reached an address with no fetch region.
    #[error("no fetch region covers address {address}")]
    BadPC { address: Address },
    #[error(transparent)]
    Runtime { source: RuntimeError },
    /// The decoder/emitter could not translate a block; the block is left
    /// untranslated and interpretation continues.
    #[error("{reason}")]
    CompileError { reason: String },
}

impl From<RuntimeError> for Error {
    fn from(source: RuntimeError) -> Self {
        Error::Runtime { source }
    }
}

impl From<ppc_interp::Error> for Error {
    fn from(source: ppc_interp::Error) -> Self {
        match source {
            ppc_interp::Error::InvalidConfig { reason } => Error::InvalidConfig { reason },
            ppc_interp::Error::Runtime { source } => Error::Runtime { source },
        }
    }
}

impl From<jit_arena::ArenaError> for Error {
    fn from(_: jit_arena::ArenaError) -> Self {
        Error::OutOfMemory
    }
}

impl From<ppc_jit::BuildError> for Error {
    fn from(source: ppc_jit::BuildError) -> Self {
        match source {
            ppc_jit::BuildError::OutOfMemory { .. } => Error::OutOfMemory,
            other => Error::CompileError { reason: other.to_string() },
        }
    }
}

impl From<crate::translate::TranslateError> for Error {
    fn from(source: crate::translate::TranslateError) -> Self {
        match source {
            crate::translate::TranslateError::BadPC { address } => Error::BadPC { address },
            other @ crate::translate::TranslateError::Unsupported { .. } => Error::CompileError { reason: other.to_string() },
        }
    }
}
