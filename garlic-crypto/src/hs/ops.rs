//! Keyed hashes and index calculations from rend-spec-v3.

use crate::d::Sha3_256;
use digest::Digest;

/// The length of the MAC returned by [`hs_mac`].
pub const HS_MAC_LEN: usize = 32;

/// Compute the lightweight MAC function used in the onion-service
/// protocol.
///
/// `MAC(k, m)` is `H(k_len | k | m)` where `k_len` is `htonll(len(k))`
/// and `H` is SHA3-256.
pub fn hs_mac(key: &[u8], msg: &[u8]) -> [u8; HS_MAC_LEN] {
    let mut d = Sha3_256::new();
    d.update((key.len() as u64).to_be_bytes());
    d.update(key);
    d.update(msg);
    d.finalize().into()
}

/// Compute the subcredential binding a service identity key to its
/// blinded key for the current time period.
///
/// `subcredential = H("subcredential" | H("credential" | pk) | blinded_pk)`.
pub fn subcredential(pk: &[u8; 32], blinded_pk: &[u8; 32]) -> [u8; 32] {
    let credential: [u8; 32] = Sha3_256::new()
        .chain_update(b"credential")
        .chain_update(pk)
        .finalize()
        .into();

    Sha3_256::new()
        .chain_update(b"subcredential")
        .chain_update(credential)
        .chain_update(blinded_pk)
        .finalize()
        .into()
}

/// Compute the hash-ring index at which one replica of a descriptor
/// is stored.
///
/// `hs_index(replicanum) = H("store-at-idx" | blinded_public_key |
/// INT_8(replicanum) | INT_8(period_length) | INT_8(period_num))`.
pub fn build_index(
    blinded_pk: &[u8; 32],
    replica: u64,
    period_length: u64,
    period_num: u64,
) -> [u8; 32] {
    Sha3_256::new()
        .chain_update(b"store-at-idx")
        .chain_update(blinded_pk)
        .chain_update(replica.to_be_bytes())
        .chain_update(period_length.to_be_bytes())
        .chain_update(period_num.to_be_bytes())
        .finalize()
        .into()
}

/// Compute the hash-ring index of a directory relay.
///
/// `hsdir_index(node) = H("node-idx" | node_identity |
/// shared_random_value | INT_8(period_num) | INT_8(period_length))`.
///
/// Note that the period_num/period_length order here is the reverse of
/// [`build_index`]; that asymmetry is part of the protocol.
pub fn build_directory_index(
    identity: &[u8; 32],
    shared_random: &[u8; 32],
    period_length: u64,
    period_num: u64,
) -> [u8; 32] {
    Sha3_256::new()
        .chain_update(b"node-idx")
        .chain_update(identity)
        .chain_update(shared_random)
        .chain_update(period_num.to_be_bytes())
        .chain_update(period_length.to_be_bytes())
        .finalize()
        .into()
}

/// Compute the "disaster" shared random value for a time period.
///
/// This SRV is used when the consensus does not list a shared random
/// value for the period, but we need to compute a directory ring for
/// it anyway.
pub fn disaster_shared_random(period_length: u64, period_num: u64) -> [u8; 32] {
    Sha3_256::new()
        .chain_update(b"shared-random-disaster")
        .chain_update(period_length.to_be_bytes())
        .chain_update(period_num.to_be_bytes())
        .finalize()
        .into()
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn mac_from_definition() {
        let d = |s: &[u8]| -> [u8; 32] { Sha3_256::digest(s).into() };
        assert_eq!(hs_mac(b"", b""), d(&[0; 8]));
        assert_eq!(
            hs_mac(b"hello", b"world"),
            d(b"\0\0\0\0\0\0\0\x05helloworld")
        );
    }

    #[test]
    fn mac_testvec() {
        // From C tor; originally generated in Python.
        let msg = b"i am in a library somewhere using my computer";
        let key = b"i'm from the past talking to the future.";
        assert_eq!(
            hs_mac(key, msg),
            hex!("753fba6d87d49497238a512a3772dd291e55f7d1cd332c9fb5c967c7a10a13ca")
        );
    }

    #[test]
    fn store_index_testvec() {
        let idx = build_index(&[0x42; 32], 1, 1440, 42);
        assert_eq!(
            idx,
            hex!("37E5CBBD56A22823714F18F1623ECE5983A0D64C78495A8CFAB854245E5F9A8A")
        );
    }

    #[test]
    fn directory_index_testvec() {
        let idx = build_directory_index(&[0x42; 32], &[0x43; 32], 1440, 42);
        assert_eq!(
            idx,
            hex!("DB475361014A09965E7E5E4D4A25B8F8D4B8F16CB1D8A7E95EED50249CC1A2D5")
        );
    }

    #[test]
    fn disaster_srv_testvec() {
        let dsrv = disaster_shared_random(1440, 1);
        assert_eq!(
            dsrv,
            hex!("F8A4948707653837FA44ABB5BBC75A12F6F101E7F8FAF699B9715F4965D3507D")
        );
        assert_eq!(
            dsrv,
            <[u8; 32]>::from(Sha3_256::digest(
                b"shared-random-disaster\0\0\0\0\0\0\x05\xA0\0\0\0\0\0\0\0\x01"
            ))
        );
    }
}
