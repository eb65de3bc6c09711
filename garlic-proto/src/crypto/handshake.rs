//! Circuit extension handshakes.
//!
//! Circuit handshakes are one-way-authenticated key exchanges: a
//! client that knows a public "onion key" for a relay sends a "client
//! onionskin" to extend to the relay, and receives a "server
//! onionskin" in response.  When the handshake is successful, both
//! sides share a set of session keys, and the client knows that
//! nobody _else_ shares those keys unless they control the relay's
//! private onion key.
//!
//! This module implements the "ntor" handshake used for ordinary
//! circuit hops, and the "hs-ntor" variant used when rendezvousing
//! with an onion service.

pub(crate) mod hs_ntor;
pub(crate) mod ntor;

use crate::{Result, SecretBytes};
use rand::{CryptoRng, RngCore};

/// A ClientHandshake is used to generate a client onionskin and
/// handle a server onionskin.
pub(crate) trait ClientHandshake {
    /// The type for the onion key.
    type KeyType;
    /// The type for the state that the client holds while waiting for
    /// a reply.
    type StateType;
    /// A type that is returned and used to generate session keys.
    type KeyGen;
    /// Generate a new client onionskin for a relay with a given onion
    /// key.
    ///
    /// On success, return a state object that will be used to
    /// complete the handshake, along with the message to send.
    fn client1<R: RngCore + CryptoRng>(
        rng: &mut R,
        key: &Self::KeyType,
    ) -> Result<(Self::StateType, Vec<u8>)>;
    /// Handle a server onionskin from a relay, and produce a key
    /// generator.
    ///
    /// The state object must match the one that was used to make the
    /// client onionskin that the server is replying to.
    fn client2<T: AsRef<[u8]>>(state: Self::StateType, msg: T) -> Result<Self::KeyGen>;
}

/// A KeyGenerator is returned by a handshake, and used to generate
/// session keys for the protocol.
///
/// Typically, it wraps a KDF function and some seed key material.
///
/// It can only be used once.
pub(crate) trait KeyGenerator {
    /// Consume the key material and expand it to the given length.
    fn expand(self, keylen: usize) -> Result<SecretBytes>;
}

/// Generates keys based on SHAKE-256.
#[allow(dead_code)] // used directly when testing the relay crypto
pub(crate) struct ShakeKeyGenerator {
    /// Seed for the key generator.
    seed: SecretBytes,
}

impl ShakeKeyGenerator {
    /// Create a key generator based on a provided seed.
    #[allow(dead_code)]
    pub(crate) fn new(seed: SecretBytes) -> Self {
        ShakeKeyGenerator { seed }
    }
}

impl KeyGenerator for ShakeKeyGenerator {
    fn expand(self, keylen: usize) -> Result<SecretBytes> {
        use crate::crypto::kdf::{Kdf, ShakeKdf};
        ShakeKdf::new().derive(&self.seed[..], keylen)
    }
}
