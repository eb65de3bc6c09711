//! Key manipulation functions for use with public keys.
//!
//! Tor does some interesting and not-really-standard things with its
//! Ed25519 keys.  The onion-service protocol derives, for every time
//! period, a "blinded" variant of each service's identity key; the
//! blinded key is what gets published to (and looked up from) the
//! hidden-service directories, so that the directories cannot link a
//! service across time periods.

use crate::d::Sha3_256;
use crate::pk::ed25519;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::scalar::Scalar;
use digest::Digest;

/// The Ed25519 basepoint, in the string form that the blinding
/// derivation requires.
const ED25519_BASEPOINT_STR: &[u8] = b"(15112221349535400772501151409588531511454012693041857206046113283949847762202, 46316835694926478169428394003475163141307993866256225615783033603165251855960)";

/// An error from trying to blind a public key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BlindingError {
    /// The provided public key bytes do not describe a point on the
    /// curve.
    #[error("public key was not a valid curve point")]
    BadPubkey,
}

/// Compute the 32-byte blinding parameter for a public identity key
/// at a given time period.
///
/// This is `h = SHA3-256(BLIND_STRING | A | s | B | N)` from
/// rend-spec-v3 appendix A.2, with an empty secret `s`, clamped for
/// use as a scalar.
fn blinding_parameter(pk: &[u8; 32], period_length: u64, period_num: u64) -> [u8; 32] {
    let mut h = Sha3_256::new();
    h.update(b"Derive temporary signing key\0");
    h.update(pk);
    h.update(ED25519_BASEPOINT_STR);
    h.update(b"key-blind");
    h.update(period_num.to_be_bytes());
    h.update(period_length.to_be_bytes());
    let mut param: [u8; 32] = h.finalize().into();

    // Standard Ed25519 scalar clamping.
    param[0] &= 248;
    param[31] &= 63;
    param[31] |= 64;
    param
}

/// Blind the ed25519 public key `pk` for the time period numbered
/// `period_num`, whose length is `period_length` minutes.
///
/// The result is `h * A`, where `h` is the clamped blinding parameter
/// and `A` is the decompressed identity point.  Fails if `pk` is not
/// a point on the curve.
pub fn blind_pubkey(
    pk: &ed25519::Ed25519Identity,
    period_length: u64,
    period_num: u64,
) -> Result<[u8; 32], BlindingError> {
    let param = blinding_parameter(pk.as_bytes(), period_length, period_num);
    let h = Scalar::from_bytes_mod_order(param);

    let point = CompressedEdwardsY(*pk.as_bytes())
        .decompress()
        .ok_or(BlindingError::BadPubkey)?;

    Ok((h * point).compress().0)
}

/// Return true if `pk` decodes to a point on the curve.
pub fn is_on_curve(pk: &[u8; 32]) -> bool {
    CompressedEdwardsY(*pk).decompress().is_some()
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn blinding_param_testvec() {
        // Generated from the hs_ntor reference tooling in little-t-tor.
        let pk = hex!("e33734887a0d09abdf3470ca9839814b5813e29844f05feaff0609899f8ce633");
        let param = blinding_parameter(&pk, 1440, 20487);
        // The expected value here is the clamped form of
        // b3d814222111c07d4b0abfad4a9327ca3bda2548f0b3641126e4780a285a2d23.
        assert_eq!(
            param,
            hex!("b0d814222111c07d4b0abfad4a9327ca3bda2548f0b3641126e4780a285a2d63")
        );
    }

    #[test]
    fn blinded_key_testvec() {
        let pk = ed25519::Ed25519Identity::new(hex!(
            "e33734887a0d09abdf3470ca9839814b5813e29844f05feaff0609899f8ce633"
        ));
        let blinded = blind_pubkey(&pk, 1440, 20487).unwrap();
        assert_eq!(
            blinded,
            hex!("b03fd1be70bb50c29e73aaaa972ffb63b8f4efc0fe472e22444f33d505054955")
        );
    }

    #[test]
    fn blinding_deterministic_and_period_dependent() {
        let pk = ed25519::Ed25519Identity::new(
            *ed25519_dalek::SigningKey::from_bytes(&[1_u8; 32])
                .verifying_key()
                .as_bytes(),
        );
        let a = blind_pubkey(&pk, 1440, 1000).unwrap();
        let b = blind_pubkey(&pk, 1440, 1000).unwrap();
        let c = blind_pubkey(&pk, 1440, 1001).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        // The blinded key is itself a valid curve point.
        assert!(is_on_curve(&a));
    }

    #[test]
    fn off_curve_rejected() {
        // Roughly half of all y coordinates have no matching x; find
        // one among small values and make sure blinding refuses it.
        let bad = (0_u8..=255)
            .map(|n| {
                let mut b = [0_u8; 32];
                b[0] = n;
                b
            })
            .find(|b| !is_on_curve(b))
            .expect("no off-curve byte string in range");
        let bad = ed25519::Ed25519Identity::new(bad);
        assert_eq!(blind_pubkey(&bad, 1440, 1), Err(BlindingError::BadPubkey));
    }
}
