//! Public-key cryptography for garlic.
//!
//! We re-export the dalek types where they fit, and wrap the raw
//! identity formats (which are used before any validation has
//! happened) in newtypes so that they can't be confused with checked
//! keys.

pub mod keymanip;

/// Re-exporting Curve25519 implementations.
///
/// Eventually there should probably be a key-handling layer here, so
/// that we can be more careful about how we store and pass private
/// keys.
pub mod curve25519 {
    pub use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
}

/// Re-exporting Ed25519 implementations, plus the identity wrapper.
pub mod ed25519 {
    use garlic_bytes::{Readable, Reader, Writeable, Writer};
    use std::fmt;

    pub use ed25519_dalek::{Signature, VerifyingKey as PublicKey};

    /// An unchecked, unvalidated Ed25519 key.
    ///
    /// This key is an "identity" in the sense that it identifies (up
    /// to) one Ed25519 public key.  It may also represent the sha256
    /// of some other material, or a key for which we have not checked
    /// the group membership.
    #[derive(
        Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
    )]
    pub struct Ed25519Identity {
        /// A raw unchecked Ed25519 public key.
        id: [u8; 32],
    }

    impl Ed25519Identity {
        /// Construct a new Ed25519 identity from a 32-byte sequence.
        ///
        /// This might or might not actually be a valid Ed25519 public
        /// key.
        pub fn new(id: [u8; 32]) -> Self {
            Ed25519Identity { id }
        }
        /// If `id` is of the correct length, wrap it in an
        /// Ed25519Identity.
        pub fn from_bytes(id: &[u8]) -> Option<Self> {
            Some(Ed25519Identity::new(id.try_into().ok()?))
        }
        /// Return a reference to the bytes in this key.
        pub fn as_bytes(&self) -> &[u8; 32] {
            &self.id
        }
        /// Try to decompress this identity into a validated public
        /// key.
        ///
        /// Fails if the bytes do not describe a point on the curve.
        pub fn as_public_key(&self) -> Option<PublicKey> {
            PublicKey::from_bytes(&self.id).ok()
        }
    }

    impl From<[u8; 32]> for Ed25519Identity {
        fn from(id: [u8; 32]) -> Self {
            Ed25519Identity::new(id)
        }
    }

    impl From<&PublicKey> for Ed25519Identity {
        fn from(pk: &PublicKey) -> Self {
            Ed25519Identity::new(*pk.as_bytes())
        }
    }

    impl fmt::Display for Ed25519Identity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", hex::encode(self.id))
        }
    }

    impl fmt::Debug for Ed25519Identity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "Ed25519Identity {{ {} }}", self)
        }
    }

    impl Readable for Ed25519Identity {
        fn take_from(r: &mut Reader<'_>) -> garlic_bytes::Result<Self> {
            let bytes: [u8; 32] = r.extract()?;
            Ok(Ed25519Identity::new(bytes))
        }
    }

    impl Writeable for Ed25519Identity {
        fn write_onto<B: Writer + ?Sized>(&self, w: &mut B) {
            w.write_all(&self.id[..]);
        }
    }
}

/// RSA identity fingerprints.
///
/// We never do any RSA operations ourselves: the 20-byte SHA1
/// fingerprint of a relay's legacy identity key is only ever used as
/// an opaque identifier in handshakes and link specifiers.
pub mod rsa {
    use garlic_bytes::{Readable, Reader, Writeable, Writer};
    use std::fmt;

    /// An identifier for an RSA key, based on SHA1 and DER.
    ///
    /// These are used (for legacy reasons) all over the protocol.
    #[derive(
        Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
    )]
    pub struct RsaIdentity {
        /// SHA1 digest of a DER encoded public key.
        id: [u8; 20],
    }

    impl RsaIdentity {
        /// Construct an RsaIdentity from a 20-byte digest.
        pub fn new(id: [u8; 20]) -> Self {
            RsaIdentity { id }
        }
        /// If `id` is of the correct length, wrap it in an
        /// RsaIdentity.
        pub fn from_bytes(id: &[u8]) -> Option<Self> {
            Some(RsaIdentity::new(id.try_into().ok()?))
        }
        /// Decode an RsaIdentity from a 40-character hex string.
        pub fn from_hex(s: &str) -> Option<Self> {
            let bytes = hex::decode(s).ok()?;
            Self::from_bytes(&bytes)
        }
        /// Return a reference to the bytes in this identity.
        pub fn as_bytes(&self) -> &[u8; 20] {
            &self.id
        }
    }

    impl From<[u8; 20]> for RsaIdentity {
        fn from(id: [u8; 20]) -> Self {
            RsaIdentity::new(id)
        }
    }

    impl fmt::Display for RsaIdentity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "${}", hex::encode(self.id))
        }
    }

    impl fmt::Debug for RsaIdentity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "RsaIdentity {{ {} }}", self)
        }
    }

    impl Readable for RsaIdentity {
        fn take_from(r: &mut Reader<'_>) -> garlic_bytes::Result<Self> {
            let bytes: [u8; 20] = r.extract()?;
            Ok(RsaIdentity::new(bytes))
        }
    }

    impl Writeable for RsaIdentity {
        fn write_onto<B: Writer + ?Sized>(&self, w: &mut B) {
            w.write_all(&self.id[..]);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_wrappers() {
        let ed = ed25519::Ed25519Identity::from_bytes(&[7; 32]).unwrap();
        assert_eq!(ed.as_bytes(), &[7; 32]);
        assert!(ed25519::Ed25519Identity::from_bytes(&[7; 31]).is_none());

        let rsa = rsa::RsaIdentity::from_hex("1234567890abcdef1234567890abcdef12345678").unwrap();
        assert_eq!(
            format!("{}", rsa),
            "$1234567890abcdef1234567890abcdef12345678"
        );
        assert!(rsa::RsaIdentity::from_hex("123456").is_none());
    }
}
