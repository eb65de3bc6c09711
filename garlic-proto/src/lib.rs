//! Implementations for the core onion-routing protocol.
//!
//! # Overview
//!
//! At its essence, the client makes direct TLS connections
//! ("channels") to onion routers.  Each channel carries an
//! onion-routed "circuit", which acts as a reliable transport for
//! "relay messages" exchanged with the relays on the circuit.
//! Finally, each circuit multiplexes a number of "streams", each
//! corresponding roughly to an application-level request.
//!
//! This crate implements the logic, protocols, and cryptography for
//! [`channel::Channel`], [`circuit::ClientCirc`], and
//! [`stream::DataStream`], together with the client side of the
//! rendezvous protocol ([`rend`]) that joins a circuit of ours to a
//! circuit built by an onion service.
//!
//! # Design notes
//!
//! Each circuit is driven by a reactor task that owns the inbound
//! half of the channel: callers interact with the circuit only
//! through message channels, which serializes all writes.  This crate
//! deliberately contains no timeouts; every operation here can block
//! until the network produces an answer, and callers at a higher
//! level bound them.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::await_holding_lock)]

pub mod channel;
pub mod circuit;
mod crypto;
pub mod rend;
pub mod stream;
mod util;

pub use util::err::Error;

/// A vector of bytes that gets cleared when it's dropped.
type SecretBytes = zeroize::Zeroizing<Vec<u8>>;

/// A Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
