//! Declare error types for the garlic-netstatus crate.

use thiserror::Error;

/// An error originating from the network-status registry.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// We couldn't reach any directory, or every directory we reached
    /// gave an unusable answer.
    #[error("no usable directory server: {0}")]
    DirectoryUnavailable(String),
    /// A directory response had an HTTP status other than 200.
    #[error("directory answered with HTTP status {0}")]
    BadResponse(u16),
    /// A compressed directory object failed to decompress.
    #[error("directory object failed to decompress")]
    Compression,
    /// A network-status or router document violated its grammar.
    #[error("directory document format violation: {0}")]
    ConsensusFormat(&'static str),
    /// An onion-service descriptor violated its grammar, or failed to
    /// decrypt.
    #[error("onion-service descriptor format violation: {0}")]
    DescriptorFormat(&'static str),
    /// A string was not a valid v3 onion address.
    #[error("invalid onion address")]
    InvalidOnionAddress,
    /// We ran out of introduction points to try for a service.
    #[error("no usable introduction points for service")]
    IntroductionPointsUnavailable,
    /// An error occurred on a socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// An operation against a directory timed out.
    #[error("directory operation timed out")]
    Timeout,
}

/// A Result using the Error type from the garlic-netstatus crate.
pub type Result<T> = std::result::Result<T, Error>;
