//! Coding and decoding for the cell types that make up the
//! onion-routing protocol.
//!
//! # Overview
//!
//! Onion routers and clients talk to one another via a TLS connection
//! (a "channel"), exchanging fixed- and variable-length "cells".
//! Some cells carry "relay messages", which travel along circuits and
//! are what clients actually use to open streams, move data, and run
//! the rendezvous protocol.
//!
//! This crate implements the encodings: [`chancell`] for cells as
//! they appear on a channel, [`relaycell`] for the messages carried
//! inside RELAY cells, and [`linkspec`] for the "link specifiers"
//! that name a relay inside EXTEND2 and INTRODUCE1 messages.
//!
//! Nothing here does cryptography; the relay-cell bodies handled here
//! are already decrypted (or not yet encrypted).

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod chancell;
mod err;
pub mod linkspec;
pub mod relaycell;

pub use err::Error;

/// An error type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
