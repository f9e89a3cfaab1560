use easyerr::Error;
use ppc_arch::Address;

/// A problem discovered while stepping the core.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no memory region covers address {address}")]
    BadAddress { address: Address },
    #[error("fetch of unaligned address {address}")]
    UnalignedFetch { address: Address },
    #[error("decoded an illegal instruction at {address}")]
    IllegalInstruction { address: Address },
}

/// The front-end's unified error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A [`crate::memory::MemoryMapConfig`] was rejected at
    /// [`crate::memory::MemoryMap::new`] time, before any instruction runs.
    #[error("{reason}")]
    InvalidConfig { reason: String },
    #[error(transparent)]
    Runtime { source: RuntimeError },
}

impl From<RuntimeError> for Error {
    fn from(source: RuntimeError) -> Self {
        Error::Runtime { source }
    }
}
