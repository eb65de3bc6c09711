//! Digests and XOFs used to implement the protocol.
//!
//! In various places, for legacy reasons, the protocol uses SHA1,
//! SHA2, SHA3, and SHAKE.  We re-export them all here, implementing
//! the [`digest::Digest`] trait.
//!
//! Other code should access these digests via the traits in the
//! [`digest`] crate.

pub use sha1::Sha1;
pub use sha2::{Sha256, Sha512};
pub use sha3::{Sha3_256, Shake256};
