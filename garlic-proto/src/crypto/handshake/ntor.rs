//! Implements the ntor handshake, as used for ordinary circuit hops.

use super::KeyGenerator;
use crate::{Error, Result, SecretBytes};
use garlic_bytes::{Reader, Writer};
use garlic_crypto::d;
use garlic_crypto::pk::curve25519::*;
use garlic_crypto::pk::rsa::RsaIdentity;
use garlic_crypto::util::ct;

use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

/// Client side of the ntor handshake.
pub(crate) struct NtorClient;

impl super::ClientHandshake for NtorClient {
    type KeyType = NtorPublicKey;
    type StateType = NtorHandshakeState;
    type KeyGen = NtorHkdfKeyGenerator;

    fn client1<R: RngCore + CryptoRng>(
        rng: &mut R,
        key: &Self::KeyType,
    ) -> Result<(Self::StateType, Vec<u8>)> {
        Ok(client_handshake_ntor_v1(rng, key))
    }

    fn client2<T: AsRef<[u8]>>(state: Self::StateType, msg: T) -> Result<Self::KeyGen> {
        client_handshake2_ntor_v1(msg, &state)
    }
}

/// A set of public keys used by a client to initiate an ntor
/// handshake.
#[derive(Clone)]
pub(crate) struct NtorPublicKey {
    /// The relay's identity fingerprint; used in the authentication
    /// calculation.
    pub(crate) id: RsaIdentity,
    /// Public curve25519 ntor key for the relay.
    pub(crate) pk: PublicKey,
}

/// Client state for an ntor handshake.
pub(crate) struct NtorHandshakeState {
    /// The relay's public key.  We need to remember this since it is
    /// used to finish the handshake.
    relay_public: NtorPublicKey,
    /// The temporary curve25519 secret (x) that we've generated for
    /// this handshake.
    //
    // We'd like to use EphemeralSecret here, but we can't since we
    // need to use it twice.
    my_sk: StaticSecret,
    /// The public key `X` corresponding to my_sk.
    my_public: PublicKey,
}

/// KeyGenerator for use with the ntor circuit handshake.
pub(crate) struct NtorHkdfKeyGenerator {
    /// Secret key information derived from the handshake, used as
    /// input to HKDF.
    seed: SecretBytes,
}

impl NtorHkdfKeyGenerator {
    /// Create a new key generator to expand a given seed.
    pub(crate) fn new(seed: SecretBytes) -> Self {
        NtorHkdfKeyGenerator { seed }
    }
}

impl KeyGenerator for NtorHkdfKeyGenerator {
    fn expand(self, keylen: usize) -> Result<SecretBytes> {
        let ntor1_key = &b"ntor-curve25519-sha256-1:key_extract"[..];
        let ntor1_expand = &b"ntor-curve25519-sha256-1:key_expand"[..];
        use crate::crypto::kdf::{Kdf, Ntor1Kdf};
        Ntor1Kdf::new(ntor1_key, ntor1_expand).derive(&self.seed[..], keylen)
    }
}

/// The HMAC tag used to authenticate the handshake.
type Authcode = [u8; 32];

/// Compute an HMAC-SHA256 of `input` keyed with `key`.
fn hmac_sha256(key: &[u8], input: &[u8]) -> Authcode {
    let mut m = Hmac::<d::Sha256>::new_from_slice(key).expect("Hmac allows keys of any size");
    m.update(input);
    m.finalize().into_bytes().into()
}

/// Perform a client handshake, generating an onionskin and a state
/// object.
fn client_handshake_ntor_v1<R>(
    rng: &mut R,
    relay_public: &NtorPublicKey,
) -> (NtorHandshakeState, Vec<u8>)
where
    R: RngCore + CryptoRng,
{
    let my_sk = StaticSecret::random_from_rng(rng);
    let my_public = PublicKey::from(&my_sk);

    client_handshake_ntor_v1_no_keygen(my_public, my_sk, relay_public)
}

/// Helper: client handshake _without_ generating new keys.
fn client_handshake_ntor_v1_no_keygen(
    my_public: PublicKey,
    my_sk: StaticSecret,
    relay_public: &NtorPublicKey,
) -> (NtorHandshakeState, Vec<u8>) {
    let mut v: Vec<u8> = Vec::new();

    v.write(&relay_public.id);
    v.write(&relay_public.pk);
    v.write(&my_public);

    assert_eq!(v.len(), 20 + 32 + 32);

    let state = NtorHandshakeState {
        relay_public: relay_public.clone(),
        my_public,
        my_sk,
    };

    (state, v)
}

/// Complete a client handshake, returning a key generator on success.
fn client_handshake2_ntor_v1<T>(msg: T, state: &NtorHandshakeState) -> Result<NtorHkdfKeyGenerator>
where
    T: AsRef<[u8]>,
{
    let mut cur = Reader::from_slice(msg.as_ref());
    let their_pk: PublicKey = cur.extract()?;
    let auth: Authcode = cur.extract()?;

    let xy = state.my_sk.diffie_hellman(&their_pk);
    let xb = state.my_sk.diffie_hellman(&state.relay_public.pk);

    let (keygen, authcode) =
        ntor_derive(&xy, &xb, &state.relay_public, &state.my_public, &their_pk);

    if !ct::bytes_eq(&authcode, &auth) {
        return Err(Error::BadHandshake);
    }

    Ok(keygen)
}

/// Helper: compute a key generator and an authentication code from a
/// set of ntor parameters.
///
/// These parameter names are as described in tor-spec.txt.
fn ntor_derive(
    xy: &SharedSecret,
    xb: &SharedSecret,
    server_pk: &NtorPublicKey,
    x: &PublicKey,
    y: &PublicKey,
) -> (NtorHkdfKeyGenerator, Authcode) {
    let ntor1_protoid = &b"ntor-curve25519-sha256-1"[..];
    let ntor1_mac = &b"ntor-curve25519-sha256-1:mac"[..];
    let ntor1_verify = &b"ntor-curve25519-sha256-1:verify"[..];
    let server_string = &b"Server"[..];

    let mut secret_input = Zeroizing::new(Vec::new());
    secret_input.write(xy); // EXP(Y,x)
    secret_input.write(xb); // EXP(B,x)
    secret_input.write(&server_pk.id); // ID
    secret_input.write(&server_pk.pk); // B
    secret_input.write(x); // X
    secret_input.write(y); // Y
    secret_input.write(ntor1_protoid); // PROTOID

    let verify = hmac_sha256(ntor1_verify, &secret_input[..]);
    let mut auth_input: SecretBytes = Zeroizing::new(Vec::new());
    auth_input.write(&verify); // verify
    auth_input.write(&server_pk.id); // ID
    auth_input.write(&server_pk.pk); // B
    auth_input.write(y); // Y
    auth_input.write(x); // X
    auth_input.write(ntor1_protoid); // PROTOID
    auth_input.write(server_string); // "Server"

    let auth_mac = hmac_sha256(ntor1_mac, &auth_input[..]);

    let keygen = NtorHkdfKeyGenerator::new(secret_input);
    (keygen, auth_mac)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::handshake::ClientHandshake;
    use hex_literal::hex;

    #[test]
    fn testvec() {
        // From tor-spec; the client completes the handshake against a
        // canned server reply.
        let b_pk = hex!("ccbc8541904d18af08753eae967874749e6149f873de937f57f8fd903a21c471");
        let x_sk = hex!("706f6461792069207075742e2e2e2e2e2e2e2e4a454c4c59206f6e2074686973");
        let x_pk = hex!("e65dfdbef8b2635837fe2cebc086a8096eae3213e6830dc407516083d412b078");
        let id = hex!("69546f6c64596f7541626f75745374616972732e");
        let client_handshake = hex!("69546f6c64596f7541626f75745374616972732eccbc8541904d18af08753eae967874749e6149f873de937f57f8fd903a21c471e65dfdbef8b2635837fe2cebc086a8096eae3213e6830dc407516083d412b078");
        let server_handshake = hex!("390480a14362761d6aec1fea840f6e9e928fb2adb7b25c670be1045e35133a371cbdf68b89923e1f85e8e18ee6e805ea333fe4849c790ffd2670bd80fec95cc8");
        let keys = hex!("0c62dee7f48893370d0ef896758d35729867beef1a5121df80e00f79ed349af39b51cae125719182f19d932a667dae1afbf2e336e6910e7822223e763afad0a13342157969dc6b79");

        let relay_pk = NtorPublicKey {
            id: RsaIdentity::from_bytes(&id).unwrap(),
            pk: b_pk.into(),
        };

        let (state, create_msg) =
            client_handshake_ntor_v1_no_keygen(x_pk.into(), x_sk.into(), &relay_pk);
        assert_eq!(&create_msg[..], &client_handshake[..]);

        let c_keygen = client_handshake2_ntor_v1(server_handshake, &state).unwrap();
        let c_keys = c_keygen.expand(keys.len()).unwrap();
        assert_eq!(&c_keys[..], &keys[..]);
    }

    #[test]
    fn tampered_reply_rejected() {
        let b_pk = hex!("ccbc8541904d18af08753eae967874749e6149f873de937f57f8fd903a21c471");
        let x_sk = hex!("706f6461792069207075742e2e2e2e2e2e2e2e4a454c4c59206f6e2074686973");
        let x_pk = hex!("e65dfdbef8b2635837fe2cebc086a8096eae3213e6830dc407516083d412b078");
        let id = hex!("69546f6c64596f7541626f75745374616972732e");
        let mut server_handshake = hex!("390480a14362761d6aec1fea840f6e9e928fb2adb7b25c670be1045e35133a371cbdf68b89923e1f85e8e18ee6e805ea333fe4849c790ffd2670bd80fec95cc8").to_vec();
        server_handshake[60] ^= 7;

        let relay_pk = NtorPublicKey {
            id: RsaIdentity::from_bytes(&id).unwrap(),
            pk: b_pk.into(),
        };
        let (state, _) = client_handshake_ntor_v1_no_keygen(x_pk.into(), x_sk.into(), &relay_pk);
        let err = client_handshake2_ntor_v1(server_handshake, &state);
        assert!(matches!(err, Err(Error::BadHandshake)));
    }

    #[test]
    fn fresh_keys_produce_valid_onionskin() {
        let mut rng = rand::thread_rng();
        let relay_pk = NtorPublicKey {
            id: RsaIdentity::new([12; 20]),
            pk: PublicKey::from(&StaticSecret::random_from_rng(&mut rng)),
        };
        let (_state, msg) = NtorClient::client1(&mut rng, &relay_pk).unwrap();
        assert_eq!(msg.len(), 84);
        assert_eq!(&msg[0..20], relay_pk.id.as_bytes());
    }
}
