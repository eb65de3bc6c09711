//! Cryptographic internals for channels and circuits.
//!
//! The handshakes that set up a circuit's keys live in [`handshake`];
//! the per-hop relay-cell encryption built from those keys lives in
//! [`cell`]; the key-derivation functions both of them use live in
//! [`kdf`].

pub(crate) mod cell;
pub(crate) mod handshake;
pub(crate) mod kdf;
