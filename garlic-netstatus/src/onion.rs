//! Decoding of v3 onion addresses.

use crate::{Error, Result};
use garlic_crypto::d::Sha3_256;
use garlic_crypto::pk::ed25519::Ed25519Identity;
use garlic_crypto::pk::keymanip;
use digest::Digest;

/// The protocol version byte that ends every v3 address.
const ONION_VERSION: u8 = 3;

/// A decoded and validated v3 onion address.
///
/// The 56-character base32 part of an address packs the service's
/// 32-byte public identity key, a 2-byte checksum, and a version
/// byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionAddress {
    /// The normalized `xxx.onion` domain this address was parsed from.
    domain: String,
    /// The service's Ed25519 identity key.
    pk: Ed25519Identity,
}

impl OnionAddress {
    /// Return the service's public identity key.
    pub fn public_key(&self) -> &Ed25519Identity {
        &self.pk
    }
    /// Return the normalized domain, including the `.onion` suffix.
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl std::str::FromStr for OnionAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<OnionAddress> {
        let domain = s.trim_end_matches('.').to_ascii_lowercase();
        let label = domain
            .strip_suffix(".onion")
            .ok_or(Error::InvalidOnionAddress)?;
        if label.len() != 56 {
            return Err(Error::InvalidOnionAddress);
        }
        let bytes = base32::decode(
            base32::Alphabet::Rfc4648 { padding: false },
            &label.to_ascii_uppercase(),
        )
        .ok_or(Error::InvalidOnionAddress)?;
        if bytes.len() != 35 {
            return Err(Error::InvalidOnionAddress);
        }

        let pk: [u8; 32] = bytes[0..32].try_into().expect("slice length");
        let checksum = &bytes[32..34];
        let version = bytes[34];
        if version != ONION_VERSION {
            return Err(Error::InvalidOnionAddress);
        }

        let expected: [u8; 32] = Sha3_256::new()
            .chain_update(b".onion checksum")
            .chain_update(pk)
            .chain_update([ONION_VERSION])
            .finalize()
            .into();
        if checksum != &expected[0..2] {
            return Err(Error::InvalidOnionAddress);
        }
        if !keymanip::is_on_curve(&pk) {
            return Err(Error::InvalidOnionAddress);
        }

        Ok(OnionAddress {
            domain,
            pk: Ed25519Identity::new(pk),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A well-known live v3 address.
    const DDG: &str = "duckduckgogg42xjoc72x3sjasowoarfbgcmvfimaftt6twagswzczad.onion";

    #[test]
    fn valid_address() {
        let addr: OnionAddress = DDG.parse().unwrap();
        assert_eq!(addr.domain(), DDG);
        // Uppercase input and a trailing dot normalize away.
        let upper: OnionAddress = DDG.to_ascii_uppercase().parse().unwrap();
        assert_eq!(upper, addr);
        let dotted: OnionAddress = format!("{}.", DDG).parse().unwrap();
        assert_eq!(dotted, addr);
    }

    #[test]
    fn rejects_malformed() {
        for bad in [
            "example.com",
            "short.onion",
            // Flip one character; either the base32 decoding or the
            // checksum will fail.
            "duckduckgogg42xjoc72x3sjasowoarfbgcmvfimaftt6twagswzczae.onion",
        ] {
            assert!(
                bad.parse::<OnionAddress>().is_err(),
                "{} should be invalid",
                bad
            );
        }
    }
}
