//! Implements the hs-ntor key exchange, as used in v3 onion services.
//!
//! The main difference between this and the standard ntor handshake
//! is that it allows each party to encrypt data (without forward
//! secrecy) after it sends the first message: clients use that to
//! encrypt the introduction request in the INTRODUCE1 message.  It
//! also swaps HKDF for SHAKE-256 and SHA-2 for SHA3-256 throughout.

// We want to use the exact variable names from rend-spec-v3.
// This means that we allow variables to be named x (privkey) and X
// (pubkey).
#![allow(non_snake_case)]

use crate::crypto::handshake::KeyGenerator;
use crate::crypto::kdf::{Kdf, ShakeKdf};
use crate::{Error, Result, SecretBytes};
use garlic_bytes::{Reader, Writer};
use garlic_crypto::cipher::aes::Aes256Ctr;
use garlic_crypto::hs::ops::hs_mac;
use garlic_crypto::pk::{curve25519, ed25519};
use garlic_crypto::util::ct;

use cipher::{KeyIvInit, StreamCipher};
use generic_array::GenericArray;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

/// The ENC_KEY from the hs-ntor protocol.
type EncKey = Zeroizing<[u8; 32]>;
/// The MAC_KEY from the hs-ntor protocol.
type MacKey = [u8; 32];
/// A generic 256-bit MAC tag.
type MacTag = [u8; 32];
/// The service's subcredential for the current time period.
pub(crate) type Subcredential = [u8; 32];

/// The key generator used by the hs-ntor handshake.
pub(crate) struct HsNtorHkdfKeyGenerator {
    /// Secret data derived from the handshake, used as input to the
    /// SHAKE-based KDF.
    seed: SecretBytes,
}

impl HsNtorHkdfKeyGenerator {
    /// Create a new key generator to expand a given seed.
    fn new(seed: SecretBytes) -> Self {
        HsNtorHkdfKeyGenerator { seed }
    }
}

impl KeyGenerator for HsNtorHkdfKeyGenerator {
    fn expand(self, keylen: usize) -> Result<SecretBytes> {
        ShakeKdf::new().derive(&self.seed[..], keylen)
    }
}

/// The input needed to enter the hs-ntor protocol as a client.
#[derive(Clone)]
pub(crate) struct HsNtorClientInput {
    /// Introduction point encryption key (aka B), from the service's
    /// descriptor.
    pub(crate) B: curve25519::PublicKey,
    /// Introduction point authentication key (aka AUTH_KEY), from the
    /// service's descriptor.
    pub(crate) auth_key: ed25519::PublicKey,
    /// The service's subcredential for this time period.
    pub(crate) subcredential: Subcredential,
    /// The plaintext that will be encrypted into the INTRODUCE1
    /// message.  Its structure is the caller's business.
    pub(crate) plaintext: Vec<u8>,
    /// The data of the INTRODUCE1 message from the beginning up to
    /// the start of the encrypted part, used to compute the MAC at
    /// the end of the message.
    pub(crate) intro_cell_data: Vec<u8>,
}

/// Client state for an hs-ntor handshake.
pub(crate) struct HsNtorClientState {
    /// Keys received from our caller when we started the protocol.
    proto_input: HsNtorClientInput,
    /// The temporary curve25519 secret that we generated for this
    /// handshake.
    x: curve25519::StaticSecret,
    /// The corresponding public key.
    X: curve25519::PublicKey,
}

/// Encrypt `plaintext` using `enc_key`, then compute the introduce
/// message MAC using `mac_key`; return (ciphertext, mac_tag).
fn encrypt_and_mac(
    mut plaintext: Vec<u8>,
    other_data: &[u8],
    enc_key: &EncKey,
    mac_key: MacKey,
) -> (Vec<u8>, MacTag) {
    let zero_iv = GenericArray::default();
    let mut cipher = Aes256Ctr::new(enc_key.as_ref().into(), &zero_iv);
    cipher.apply_keystream(&mut plaintext);
    let ciphertext = plaintext; // it's now encrypted

    // Staple the rest of the INTRODUCE1 data right before the
    // ciphertext to create the body of the MAC tag.
    let mut mac_body: Vec<u8> = Vec::new();
    mac_body.extend(other_data);
    mac_body.extend(&ciphertext);
    let mac_tag = hs_mac(&mac_key, &mac_body);

    (ciphertext, mac_tag)
}

/// The client is about to make an INTRODUCE1 message.  Perform the
/// first part of the client handshake.
///
/// Return a state object, and the data that should be appended to the
/// plaintext framing of the INTRODUCE1 message:
///
/// ```text
///  CLIENT_PK                [32 bytes]
///  ENCRYPTED_DATA           [same length as the plaintext]
///  MAC                      [32 bytes]
/// ```
pub(crate) fn client_send_intro<R>(
    rng: &mut R,
    proto_input: &HsNtorClientInput,
) -> Result<(HsNtorClientState, Vec<u8>)>
where
    R: RngCore + CryptoRng,
{
    // Create the client's ephemeral keys for this handshake.
    let x = curve25519::StaticSecret::random_from_rng(rng);
    let X = curve25519::PublicKey::from(&x);

    // Get EXP(B,x).
    let bx = x.diffie_hellman(&proto_input.B);

    let state = HsNtorClientState {
        proto_input: proto_input.clone(),
        x,
        X,
    };

    let (enc_key, mac_key) = get_introduce1_key_material(
        &bx,
        &state.proto_input.auth_key,
        &X,
        &state.proto_input.B,
        &state.proto_input.subcredential,
    );

    let (ciphertext, mac_tag) = encrypt_and_mac(
        state.proto_input.plaintext.clone(),
        &state.proto_input.intro_cell_data,
        &enc_key,
        mac_key,
    );

    let mut response: Vec<u8> = Vec::new();
    response.write(&X);
    response.write(&ciphertext[..]);
    response.write(&mac_tag);

    Ok((state, response))
}

/// The introduction has been completed and the service has replied
/// with a RENDEZVOUS2.
///
/// Handle it by computing and verifying the MAC; if it's legit,
/// return a key generator based on the result of the key exchange.
pub(crate) fn client_receive_rend<T>(
    state: &HsNtorClientState,
    msg: T,
) -> Result<HsNtorHkdfKeyGenerator>
where
    T: AsRef<[u8]>,
{
    // Extract the public key of the service from the message.
    let mut cur = Reader::from_slice(msg.as_ref());
    let Y: curve25519::PublicKey = cur.extract()?;
    let mac_tag: MacTag = cur.extract()?;

    // Get EXP(Y,x) and EXP(B,x).
    let xy = state.x.diffie_hellman(&Y);
    let xb = state.x.diffie_hellman(&state.proto_input.B);

    let (keygen, my_mac_tag) = get_rendezvous1_key_material(
        &xy,
        &xb,
        &state.proto_input.auth_key,
        &state.proto_input.B,
        &state.X,
        &Y,
    );

    // Validate the MAC!
    if !ct::bytes_eq(&my_mac_tag, &mac_tag) {
        return Err(Error::HsHandshakeMacMismatch);
    }

    Ok(keygen)
}

/// Helper: compute the part of the handshake that generates key
/// material for creating and handling INTRODUCE1 messages:
///
/// ```text
///  intro_secret_hs_input = EXP(B,x) | AUTH_KEY | X | B | PROTOID
///  info = m_hsexpand | subcredential
///  hs_keys = KDF(intro_secret_hs_input | t_hsenc | info, 64)
///  ENC_KEY = hs_keys[0:32]
///  MAC_KEY = hs_keys[32:64]
/// ```
fn get_introduce1_key_material(
    bx: &curve25519::SharedSecret,
    auth_key: &ed25519::PublicKey,
    X: &curve25519::PublicKey,
    B: &curve25519::PublicKey,
    subcredential: &Subcredential,
) -> (EncKey, MacKey) {
    let hs_ntor_protoid_constant = &b"tor-hs-ntor-curve25519-sha3-256-1"[..];
    let hs_ntor_key_constant = &b"tor-hs-ntor-curve25519-sha3-256-1:hs_key_extract"[..];
    let hs_ntor_expand_constant = &b"tor-hs-ntor-curve25519-sha3-256-1:hs_key_expand"[..];

    let mut secret_input = Zeroizing::new(Vec::new());
    secret_input.write(bx); // EXP(B,x)
    secret_input.write(auth_key); // AUTH_KEY
    secret_input.write(X); // X
    secret_input.write(B); // B
    secret_input.write(hs_ntor_protoid_constant); // PROTOID
    // Now fold in the t_hsenc...
    secret_input.write(hs_ntor_key_constant);
    // ...and the 'info'.
    secret_input.write(hs_ntor_expand_constant);
    secret_input.write(subcredential);

    let mut keystream = Zeroizing::new([0_u8; 64]);
    {
        use digest::{ExtendableOutput, Update, XofReader};
        let mut xof = garlic_crypto::d::Shake256::default();
        xof.update(&secret_input[..]);
        xof.finalize_xof().read(&mut keystream[..]);
    }
    let enc_key = Zeroizing::new(keystream[0..32].try_into().expect("slice length"));
    let mac_key = keystream[32..64].try_into().expect("slice length");

    (enc_key, mac_key)
}

/// Helper: compute the last part of the handshake, which derives the
/// key material for the rendezvous hop:
///
/// ```text
///  rend_secret_hs_input = EXP(X,y) | EXP(X,b) | AUTH_KEY | B | X | Y | PROTOID
///  NTOR_KEY_SEED = MAC(rend_secret_hs_input, t_hsenc)
///  verify = MAC(rend_secret_hs_input, t_hsverify)
///  auth_input = verify | AUTH_KEY | B | Y | X | PROTOID | "Server"
///  AUTH_INPUT_MAC = MAC(auth_input, t_hsmac)
/// ```
///
/// Return (keygen, AUTH_INPUT_MAC), where keygen is based on
/// NTOR_KEY_SEED.
fn get_rendezvous1_key_material(
    xy: &curve25519::SharedSecret,
    xb: &curve25519::SharedSecret,
    auth_key: &ed25519::PublicKey,
    B: &curve25519::PublicKey,
    X: &curve25519::PublicKey,
    Y: &curve25519::PublicKey,
) -> (HsNtorHkdfKeyGenerator, MacTag) {
    let hs_ntor_protoid_constant = &b"tor-hs-ntor-curve25519-sha3-256-1"[..];
    let hs_ntor_mac_constant = &b"tor-hs-ntor-curve25519-sha3-256-1:hs_mac"[..];
    let hs_ntor_verify_constant = &b"tor-hs-ntor-curve25519-sha3-256-1:hs_verify"[..];
    let server_string_constant = &b"Server"[..];
    let hs_ntor_expand_constant = &b"tor-hs-ntor-curve25519-sha3-256-1:hs_key_expand"[..];
    let hs_ntor_key_constant = &b"tor-hs-ntor-curve25519-sha3-256-1:hs_key_extract"[..];

    // Start with rend_secret_hs_input.
    let mut secret_input = Zeroizing::new(Vec::new());
    secret_input.write(xy); // EXP(X,y)
    secret_input.write(xb); // EXP(X,b)
    secret_input.write(auth_key); // AUTH_KEY
    secret_input.write(B); // B
    secret_input.write(X); // X
    secret_input.write(Y); // Y
    secret_input.write(hs_ntor_protoid_constant); // PROTOID

    // Build NTOR_KEY_SEED and verify.
    let ntor_key_seed = hs_mac(&secret_input, hs_ntor_key_constant);
    let verify = hs_mac(&secret_input, hs_ntor_verify_constant);

    // Start building 'auth_input'.
    let mut auth_input = Vec::new();
    auth_input.write(&verify);
    auth_input.write(auth_key); // AUTH_KEY
    auth_input.write(B); // B
    auth_input.write(Y); // Y
    auth_input.write(X); // X
    auth_input.write(hs_ntor_protoid_constant); // PROTOID
    auth_input.write(server_string_constant); // "Server"

    // Get AUTH_INPUT_MAC.
    let auth_input_mac = hs_mac(&auth_input, hs_ntor_mac_constant);

    // Now finish up with the KDF construction.
    let mut kdf_seed = Zeroizing::new(Vec::new());
    kdf_seed.write(&ntor_key_seed);
    kdf_seed.write(hs_ntor_expand_constant);
    let keygen = HsNtorHkdfKeyGenerator::new(kdf_seed);

    (keygen, auth_input_mac)
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    /// Test-side implementation of the service's role, built from the
    /// same helpers.
    fn service_receive_intro(
        b: &curve25519::StaticSecret,
        auth_key: &ed25519::PublicKey,
        subcredential: &Subcredential,
        intro_cell_data: &[u8],
        msg: &[u8],
    ) -> (HsNtorHkdfKeyGenerator, Vec<u8>, Vec<u8>) {
        let B = curve25519::PublicKey::from(b);
        let mut cur = Reader::from_slice(msg);
        let X: curve25519::PublicKey = cur.extract().unwrap();
        let remaining = cur.remaining();
        let ciphertext = cur.take(remaining - 32).unwrap().to_vec();
        let mac_tag: MacTag = cur.extract().unwrap();

        let bx = b.diffie_hellman(&X);
        let (enc_key, mac_key) =
            get_introduce1_key_material(&bx, auth_key, &X, &B, subcredential);

        let mut mac_body = intro_cell_data.to_vec();
        mac_body.extend(&ciphertext);
        assert_eq!(hs_mac(&mac_key, &mac_body), mac_tag);

        let mut plaintext = ciphertext;
        let zero_iv = GenericArray::default();
        let mut cipher = Aes256Ctr::new(enc_key.as_ref().into(), &zero_iv);
        cipher.apply_keystream(&mut plaintext);

        // Reply as the service would, via the rendezvous point.
        let mut rng = rand::thread_rng();
        let y = curve25519::StaticSecret::random_from_rng(&mut rng);
        let Y = curve25519::PublicKey::from(&y);
        let xy = y.diffie_hellman(&X);
        let xb = b.diffie_hellman(&X);
        let (keygen, auth_input_mac) =
            get_rendezvous1_key_material(&xy, &xb, auth_key, &B, &X, &Y);

        let mut reply: Vec<u8> = Vec::new();
        reply.write(&Y);
        reply.write(&auth_input_mac);
        (keygen, reply, plaintext)
    }

    #[test]
    fn full_handshake() {
        let mut rng = rand::thread_rng();

        // Keys for the introduction point / service.
        let intro_b = curve25519::StaticSecret::random_from_rng(&mut rng);
        let intro_B = curve25519::PublicKey::from(&intro_b);
        let auth_keypair = ed25519_dalek::SigningKey::from_bytes(&[9; 32]);
        let auth_key = auth_keypair.verifying_key();

        let client_input = HsNtorClientInput {
            B: intro_B,
            auth_key,
            subcredential: [5; 32],
            plaintext: vec![66; 10],
            intro_cell_data: vec![42; 60],
        };

        // Client: builds the INTRODUCE1 trailer.
        let (state, cmsg) = client_send_intro(&mut rng, &client_input).unwrap();

        // Service: unpacks it and replies.
        let (skeygen, smsg, s_plaintext) =
            service_receive_intro(&intro_b, &auth_key, &[5; 32], &[42; 60], &cmsg);
        assert_eq!(s_plaintext, vec![66; 10]);

        // Client: completes the handshake.
        let ckeygen = client_receive_rend(&state, smsg).unwrap();

        let skeys = skeygen.expand(128).unwrap();
        let ckeys = ckeygen.expand(128).unwrap();
        assert_eq!(skeys, ckeys);
    }

    #[test]
    fn tampered_rendezvous2_rejected() {
        let mut rng = rand::thread_rng();
        let intro_b = curve25519::StaticSecret::random_from_rng(&mut rng);
        let auth_keypair = ed25519_dalek::SigningKey::from_bytes(&[9; 32]);
        let auth_key = auth_keypair.verifying_key();

        let client_input = HsNtorClientInput {
            B: curve25519::PublicKey::from(&intro_b),
            auth_key,
            subcredential: [5; 32],
            plaintext: vec![1; 8],
            intro_cell_data: vec![2; 8],
        };
        let (state, cmsg) = client_send_intro(&mut rng, &client_input).unwrap();
        let (_, mut smsg, _) =
            service_receive_intro(&intro_b, &auth_key, &[5; 32], &[2; 8], &cmsg);
        smsg[40] ^= 1;
        assert!(matches!(
            client_receive_rend(&state, smsg),
            Err(Error::HsHandshakeMacMismatch)
        ));
    }

    #[test]
    fn ntor_mac_testvec() {
        // Generated with hs_ntor_ref.py from little-t-tor.
        let result = hs_mac(b"who", b"knows?");
        assert_eq!(
            &result,
            &hex!("5e7da329630fdaa3eab7498bb1dc625bbb9ca968f10392b6af92d51d5db17473")
        );

        let result = hs_mac(b"gone", b"by");
        assert_eq!(
            &result,
            &hex!("90071aabb06d3f7c777db41542f4790c7dd9e2e7b2b842f54c9c42bbdb37e9a0")
        );
    }
}
