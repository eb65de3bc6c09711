//! Declare the error type for the garlic-client crate.

use thiserror::Error;

/// An error produced by the garlic client.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A directory or network-status operation failed.
    #[error("directory error: {0}")]
    NetStatus(#[from] garlic_netstatus::Error),
    /// A channel, circuit, or stream operation failed.
    #[error("protocol error: {0}")]
    Proto(#[from] garlic_proto::Error),
    /// Every lane of a circuit race failed before the deadline.
    #[error("all rendezvous lanes failed")]
    AllLanesFailed,
    /// An operation exceeded its time budget.
    #[error("operation timed out")]
    Timeout,
    /// An internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A Result using the garlic-client Error type.
pub type Result<T> = std::result::Result<T, Error>;
