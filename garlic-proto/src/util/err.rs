//! Define an error type for the garlic-proto crate.

use garlic_cell::relaycell::msg::{EndReason, IntroAckStatus};
use thiserror::Error;

/// An error type for the garlic-proto crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// An IO error occurred on a channel's socket.
    #[error("io error: {0}")]
    IoErr(#[from] std::io::Error),
    /// The TLS handshake with a relay failed.
    #[error("tls error: {0}")]
    TlsErr(#[from] native_tls::Error),
    /// A cell failed to encode or decode.
    #[error("cell error: {0}")]
    CellErr(#[from] garlic_cell::Error),
    /// An object failed to parse.
    #[error("parse error: {0}")]
    BytesErr(#[from] garlic_bytes::Error),
    /// The relay sent cells that violate the channel protocol.
    #[error("channel protocol violation: {0}")]
    ChanProto(String),
    /// A relay sent messages that violate the circuit protocol.
    #[error("circuit protocol violation: {0}")]
    CircProto(String),
    /// The channel is closed and can carry no more cells.
    #[error("channel closed")]
    ChannelClosed,
    /// The circuit is closed and can carry no more messages.
    #[error("circuit closed")]
    CircuitClosed,
    /// A relay tore the circuit down with a DESTROY cell.
    #[error("circuit destroyed: {0}")]
    CircDestroy(String),
    /// An inbound relay cell was not recognized by any hop.
    #[error("relay cell recognized by no hop")]
    BadCellAuth,
    /// The ntor handshake failed: the relay's auth tag did not verify.
    #[error("handshake failed")]
    BadHandshake,
    /// The hs-ntor handshake failed: the service's auth tag did not
    /// verify.
    #[error("onion-service handshake MAC mismatch")]
    HsHandshakeMacMismatch,
    /// The introduction point did not relay our introduction.
    #[error("introduction rejected with status {0}")]
    IntroduceRejected(IntroAckStatus),
    /// A stream was closed by an END message from the relay.
    #[error("stream ended with reason {0}")]
    EndReceived(EndReason),
    /// A stream is closed and can carry no more data.
    #[error("stream closed: {0}")]
    StreamClosed(&'static str),
    /// A relay sent messages that violate the stream protocol.
    #[error("stream protocol violation: {0}")]
    StreamProto(String),
    /// Tried to use a hop that the circuit doesn't have.
    #[error("no such hop on circuit")]
    NoSuchHop,
    /// Tried to extract too much key material from a KDF.
    #[error("tried to extract too much data from a KDF")]
    InvalidOutputLength,
    /// An internal programming error.
    #[error("internal error: {0}")]
    InternalError(String),
}
