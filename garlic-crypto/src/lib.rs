//! Low-level crypto implementations for garlic.
//!
//! For the most part this crate just wraps other crates that
//! implement lower-level cryptographic functionality: in some cases
//! the functionality is just re-exported, in others it is wrapped to
//! present a consistent interface.
//!
//! Encryption is implemented in `cipher`, digests are in `d`, and
//! public key cryptography (including key blinding and key agreement)
//! is in `pk`.  The onion-service derivations that sit on top of
//! those primitives -- subcredentials, directory indices, and
//! time-period arithmetic -- live in `hs`.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod cipher;
pub mod d;
pub mod hs;
pub mod pk;
pub mod util;
