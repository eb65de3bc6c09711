//! Define an error type for the garlic-cell crate.

use thiserror::Error;

/// An error type for the garlic-cell crate.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// An error that occurred while trying to parse an encoded object.
    #[error("parsing error: {0}")]
    BytesErr(#[from] garlic_bytes::Error),
    /// A cell or message that violates the channel protocol.
    #[error("channel protocol violation: {0}")]
    ChanProto(String),
    /// A message was far too large to encode into a cell.
    #[error("object too big to encode")]
    CantEncode,
    /// A stream address was not a valid hostname.
    #[error("bad stream address")]
    BadStreamAddress,
    /// An internal error.
    #[error("internal error: {0}")]
    Internal(&'static str),
}
