//!
//! Error types shared by the container reader and the VP9 parser
//!
use thiserror::Error;

///
/// Parse failure
///
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Wrong magic/sync code, or an unexpected element at a position that requires a specific one.
    #[error("{context}: expected {expected}, found {found}")]
    StructuralMismatch {
        context: &'static str,
        expected: String,
        found: String,
    },

    /// Fewer bytes remain than a declared length requires.
    #[error("truncated input while reading {context} at offset {offset}")]
    TruncatedInput { context: &'static str, offset: usize },

    /// A "reserved must be zero" bit is set, or a similar bitstream constraint does not hold.
    #[error("constraint violation: {0}")]
    ConstraintViolation(&'static str),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    /// Syntax that is recognized but whose decoding process is not implemented.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl Error {
    pub(crate) fn mismatch<E, F>(context: &'static str, expected: E, found: F) -> Self
    where
        E: ToString,
        F: ToString,
    {
        Error::StructuralMismatch {
            context,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
