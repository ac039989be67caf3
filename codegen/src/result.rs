//! Result and error types used at stage and build boundaries.

use thiserror::Error;

/// A compilation error.
///
/// Stage failures are fatal for the method being compiled; `TypeSystem`
/// and `Linker` errors abort the whole build.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// An IR invariant did not hold. This is a compiler bug; the method is
    /// aborted and flagged.
    #[error("verifier: {0}")]
    Verifier(String),

    /// The input uses a construct this back-end does not support.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The linker could not lay the image out as requested.
    #[error("linker: {0}")]
    Linker(String),

    /// The type system is inconsistent: an unresolved type, a missing
    /// interface implementation.
    #[error("type system: {0}")]
    TypeSystem(String),
}

/// A convenient alias for `Result` with `CodegenError`.
pub type CodegenResult<T> = Result<T, CodegenError>;
