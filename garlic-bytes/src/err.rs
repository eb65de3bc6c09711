//! Error type for garlic-bytes.

use thiserror::Error;

/// Error type for decoding protocol objects from bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The object is truncated, or not fully present in the buffer.
    #[error("object truncated (or not fully present)")]
    Truncated,
    /// There were extra bytes at the end of the object.
    #[error("extra bytes at end of object")]
    ExtraneousBytes,
    /// The object failed some semantic check while decoding.
    #[error("bad object: {0}")]
    BadMessage(&'static str),
    /// An internal programming error.
    #[error("internal programming error")]
    Internal,
}
