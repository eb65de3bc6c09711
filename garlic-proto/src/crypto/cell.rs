//! Relay cell cryptography
//!
//! Relay cells are transmitted through the network along circuits.
//! The client shares two different sets of keys and state with each
//! of the relays on the circuit: one for "outbound" traffic, and one
//! for "inbound" traffic.  Most hops use AES-128-CTR with running
//! SHA-1 digests; the hop added by a completed rendezvous uses
//! AES-256-CTR with SHA3-256.

use crate::{Error, Result};
use garlic_cell::chancell::RawCellBody;

use cipher::{KeyIvInit, StreamCipher};
use digest::Digest;
use generic_array::typenum::Unsigned;
use generic_array::GenericArray;

/// Type for the body of a relay cell.
#[derive(Clone)]
pub(crate) struct RelayCellBody(RawCellBody);

impl From<RawCellBody> for RelayCellBody {
    fn from(body: RawCellBody) -> Self {
        RelayCellBody(body)
    }
}
impl From<RelayCellBody> for RawCellBody {
    fn from(cell: RelayCellBody) -> Self {
        cell.0
    }
}
impl AsRef<[u8]> for RelayCellBody {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}
impl AsMut<[u8]> for RelayCellBody {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0[..]
    }
}

/// Represents the ability for circuit crypto state to be initialized
/// from a given seed.
pub(crate) trait CryptInit: Sized {
    /// Return the number of bytes that this state will require.
    fn seed_len() -> usize;
    /// Construct this state from a seed of the appropriate length.
    fn initialize(seed: &[u8]) -> Self;
    /// Initialize this object from a key generator.
    fn construct<K: super::handshake::KeyGenerator>(keygen: K) -> Result<Self> {
        let seed = keygen.expand(Self::seed_len())?;
        Ok(Self::initialize(&seed))
    }
}

/// A paired object containing an inbound client layer and an outbound
/// client layer.
pub(crate) trait ClientLayer<F, B>
where
    F: OutboundClientLayer,
    B: InboundClientLayer,
{
    /// Consume this ClientLayer and return a paired forward and
    /// reverse crypto layer.
    fn split(self) -> (F, B);
}

/// A client's view of the crypto state shared with a single relay, as
/// used for outbound cells.
pub(crate) trait OutboundClientLayer {
    /// Prepare a RelayCellBody to be sent to the relay at this layer,
    /// and encrypt it.
    ///
    /// Return the authentication tag.
    fn originate_for(&mut self, cell: &mut RelayCellBody) -> Vec<u8>;
    /// Encrypt a RelayCellBody to be decrypted by this layer.
    fn encrypt_outbound(&mut self, cell: &mut RelayCellBody);
}

/// A client's view of the crypto state shared with a single relay, as
/// used for inbound cells.
pub(crate) trait InboundClientLayer {
    /// Decrypt a RelayCellBody that passed through this layer.
    ///
    /// Return the authentication tag if this layer is the originator.
    fn decrypt_inbound(&mut self, cell: &mut RelayCellBody) -> Option<Vec<u8>>;
}

/// Type to store hop indices on a circuit.
///
/// Hop indices are zero-based: "0" denotes the first hop on the
/// circuit.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) struct HopNum(u8);

impl From<HopNum> for u8 {
    fn from(hop: HopNum) -> u8 {
        hop.0
    }
}

impl From<u8> for HopNum {
    fn from(v: u8) -> HopNum {
        HopNum(v)
    }
}

impl From<HopNum> for usize {
    fn from(hop: HopNum) -> usize {
        hop.0 as usize
    }
}

impl std::fmt::Display for HopNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        self.0.fmt(f)
    }
}

/// A client's view of the cryptographic state for an entire
/// constructed circuit, as used for sending cells.
pub(crate) struct OutboundClientCrypt {
    /// Vector of layers, one for each hop on the circuit, ordered
    /// from the closest hop to the farthest.
    layers: Vec<Box<dyn OutboundClientLayer + Send>>,
}

/// A client's view of the cryptographic state for an entire
/// constructed circuit, as used for receiving cells.
pub(crate) struct InboundClientCrypt {
    /// Vector of layers, one for each hop on the circuit, ordered
    /// from the closest hop to the farthest.
    layers: Vec<Box<dyn InboundClientLayer + Send>>,
}

impl OutboundClientCrypt {
    /// Return a new (empty) OutboundClientCrypt.
    pub(crate) fn new() -> Self {
        OutboundClientCrypt { layers: Vec::new() }
    }
    /// Prepare a cell body to be sent away from the client.
    ///
    /// The cell is prepared for the `hop`th hop, and then encrypted
    /// with the appropriate keys, innermost layer first.
    ///
    /// On success, returns the tag that should be expected for an
    /// authenticated SENDME sent in response to this cell.
    pub(crate) fn encrypt(&mut self, cell: &mut RelayCellBody, hop: HopNum) -> Result<Vec<u8>> {
        let hop: usize = hop.into();
        if hop >= self.layers.len() {
            return Err(Error::NoSuchHop);
        }

        let mut layers = self.layers.iter_mut().take(hop + 1).rev();
        let first_layer = layers.next().ok_or(Error::NoSuchHop)?;
        let tag = first_layer.originate_for(cell);
        for layer in layers {
            layer.encrypt_outbound(cell);
        }
        Ok(tag)
    }

    /// Add a new layer to this OutboundClientCrypt.
    pub(crate) fn add_layer(&mut self, layer: Box<dyn OutboundClientLayer + Send>) {
        assert!(self.layers.len() < u8::MAX as usize);
        self.layers.push(layer);
    }

    /// Return the number of layers configured on this
    /// OutboundClientCrypt.
    pub(crate) fn n_layers(&self) -> usize {
        self.layers.len()
    }
}

impl InboundClientCrypt {
    /// Return a new (empty) InboundClientCrypt.
    pub(crate) fn new() -> Self {
        InboundClientCrypt { layers: Vec::new() }
    }
    /// Decrypt an incoming cell that is coming to the client,
    /// outermost layer first.
    ///
    /// On success, return which hop was the originator of the cell,
    /// and the authentication tag.
    pub(crate) fn decrypt(&mut self, cell: &mut RelayCellBody) -> Result<(HopNum, Vec<u8>)> {
        for (hopnum, layer) in self.layers.iter_mut().enumerate() {
            if let Some(tag) = layer.decrypt_inbound(cell) {
                assert!(hopnum <= u8::MAX as usize);
                return Ok(((hopnum as u8).into(), tag));
            }
        }
        Err(Error::BadCellAuth)
    }
    /// Add a new layer to this InboundClientCrypt.
    pub(crate) fn add_layer(&mut self, layer: Box<dyn InboundClientLayer + Send>) {
        assert!(self.layers.len() < u8::MAX as usize);
        self.layers.push(layer);
    }
}

/// Standard relay crypto, as instantiated for ordinary circuit hops.
pub(crate) type Tor1RelayCrypto = tor1::CryptStatePair<
    garlic_crypto::cipher::aes::Aes128Ctr,
    garlic_crypto::d::Sha1,
>;

/// Relay crypto as instantiated for the hop added by a completed
/// rendezvous.
pub(crate) type HsV3RelayCrypto = tor1::CryptStatePair<
    garlic_crypto::cipher::aes::Aes256Ctr,
    garlic_crypto::d::Sha3_256,
>;

/// Implementation of the "tor1" relay crypto style: a stream cipher
/// plus a running digest whose 4-byte prefix authenticates each cell.
pub(crate) mod tor1 {
    use super::*;

    /// A CryptState is one half of a ClientLayer.
    ///
    /// It is parameterized on a stream cipher and a digest type: most
    /// hops use AES-128-CTR and SHA1, but the rendezvous hop uses
    /// AES-256-CTR and SHA3-256.
    pub(crate) struct CryptState<SC: StreamCipher, D: Digest + Clone> {
        /// Stream cipher for en/decrypting cell bodies.
        cipher: SC,
        /// Digest for authenticating cells to/from this hop.
        digest: D,
        /// Most recent digest value generated by this crypto.
        last_digest_val: GenericArray<u8, D::OutputSize>,
    }

    /// A pair of CryptStates, one for the forward (away from client)
    /// direction, and one for the reverse (towards client) direction.
    pub(crate) struct CryptStatePair<SC: StreamCipher, D: Digest + Clone> {
        /// State for en/decrypting cells sent away from the client.
        fwd: CryptState<SC, D>,
        /// State for en/decrypting cells sent towards the client.
        back: CryptState<SC, D>,
    }

    impl<SC: StreamCipher + KeyIvInit, D: Digest + Clone> CryptInit for CryptStatePair<SC, D> {
        fn seed_len() -> usize {
            SC::KeySize::to_usize() * 2 + D::OutputSize::to_usize() * 2
        }
        fn initialize(seed: &[u8]) -> Self {
            assert!(seed.len() == Self::seed_len());
            let keylen = SC::KeySize::to_usize();
            let dlen = D::OutputSize::to_usize();
            let fdinit = &seed[0..dlen];
            let bdinit = &seed[dlen..dlen * 2];
            let fckey = &seed[dlen * 2..dlen * 2 + keylen];
            let bckey = &seed[dlen * 2 + keylen..dlen * 2 + keylen * 2];
            let fwd = CryptState {
                cipher: SC::new(GenericArray::from_slice(fckey), &Default::default()),
                digest: D::new().chain_update(fdinit),
                last_digest_val: GenericArray::default(),
            };
            let back = CryptState {
                cipher: SC::new(GenericArray::from_slice(bckey), &Default::default()),
                digest: D::new().chain_update(bdinit),
                last_digest_val: GenericArray::default(),
            };
            CryptStatePair { fwd, back }
        }
    }

    impl<SC, D> ClientLayer<CryptState<SC, D>, CryptState<SC, D>> for CryptStatePair<SC, D>
    where
        SC: StreamCipher,
        D: Digest + Clone,
    {
        fn split(self) -> (CryptState<SC, D>, CryptState<SC, D>) {
            (self.fwd, self.back)
        }
    }

    impl<SC: StreamCipher, D: Digest + Clone> OutboundClientLayer for CryptState<SC, D> {
        fn originate_for(&mut self, cell: &mut RelayCellBody) -> Vec<u8> {
            cell.set_digest(&mut self.digest, &mut self.last_digest_val);
            self.encrypt_outbound(cell);
            self.last_digest_val.to_vec()
        }
        fn encrypt_outbound(&mut self, cell: &mut RelayCellBody) {
            self.cipher.apply_keystream(&mut cell.0[..]);
        }
    }

    impl<SC: StreamCipher, D: Digest + Clone> InboundClientLayer for CryptState<SC, D> {
        fn decrypt_inbound(&mut self, cell: &mut RelayCellBody) -> Option<Vec<u8>> {
            self.cipher.apply_keystream(&mut cell.0[..]);
            if cell.recognized(&mut self.digest, &mut self.last_digest_val) {
                Some(self.last_digest_val.to_vec())
            } else {
                None
            }
        }
    }

    /// For testing: act as the relay-side crypto of a single hop.
    #[cfg(test)]
    impl<SC: StreamCipher, D: Digest + Clone> CryptStatePair<SC, D> {
        /// Prepare a cell to be sent towards the client.
        pub(crate) fn originate(&mut self, cell: &mut RelayCellBody) {
            let mut d_ignored = GenericArray::default();
            cell.set_digest(&mut self.back.digest, &mut d_ignored);
        }
        /// Encrypt a cell that is moving towards the client.
        pub(crate) fn encrypt_inbound(&mut self, cell: &mut RelayCellBody) {
            self.back.cipher.apply_keystream(cell.as_mut());
        }
        /// Decrypt a cell that is moving away from the client; return
        /// true if it is addressed to us.
        pub(crate) fn decrypt_outbound(&mut self, cell: &mut RelayCellBody) -> bool {
            self.fwd.cipher.apply_keystream(cell.as_mut());
            let mut d_ignored = GenericArray::default();
            cell.recognized(&mut self.fwd.digest, &mut d_ignored)
        }
    }

    impl RelayCellBody {
        /// Prepare a cell body by setting its digest and recognized
        /// field.
        fn set_digest<D: Digest + Clone>(
            &mut self,
            d: &mut D,
            used_digest: &mut GenericArray<u8, D::OutputSize>,
        ) {
            self.0[1] = 0;
            self.0[2] = 0;
            self.0[5] = 0;
            self.0[6] = 0;
            self.0[7] = 0;
            self.0[8] = 0;

            d.update(&self.0[..]);
            *used_digest = d.clone().finalize();
            self.0[5..9].copy_from_slice(&used_digest[0..4]);
        }
        /// Check a cell to see whether its recognized field and
        /// digest match our view of the running digest; commit the
        /// new digest state on a match.
        fn recognized<D: Digest + Clone>(
            &self,
            d: &mut D,
            rcvd: &mut GenericArray<u8, D::OutputSize>,
        ) -> bool {
            use arrayref::array_ref;
            use garlic_crypto::util::ct;

            // Validate 'Recognized' field.
            let recognized = u16::from_be_bytes(*array_ref![self.0, 1, 2]);
            if recognized != 0 {
                return false;
            }

            // Now also validate the 'Digest' field.
            let mut dtmp = d.clone();
            // Add bytes up to the 'Digest' field.
            dtmp.update(&self.0[..5]);
            // Add zeroes where the 'Digest' field is.
            dtmp.update([0_u8; 4]);
            // Add the rest of the bytes.
            dtmp.update(&self.0[9..]);
            // Clone the digest before finalize destroys it, because
            // we may need to commit it.
            let dtmp_clone = dtmp.clone();
            let result = dtmp.finalize();

            if ct::bytes_eq(&self.0[5..9], &result[0..4]) {
                // The cell is ours; keep the running digest.
                *d = dtmp_clone;
                *rcvd = result;
                return true;
            }

            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::handshake::ShakeKeyGenerator as KGen;
    use crate::SecretBytes;
    use rand::RngCore;

    fn add_layers<SC, D>(
        cc_out: &mut OutboundClientCrypt,
        cc_in: &mut InboundClientCrypt,
        pair: tor1::CryptStatePair<SC, D>,
    ) where
        SC: StreamCipher + Send + 'static,
        D: Digest + Clone + Send + 'static,
    {
        let (outbound, inbound) = pair.split();
        cc_out.add_layer(Box::new(outbound));
        cc_in.add_layer(Box::new(inbound));
    }

    fn s(seed: &[u8]) -> SecretBytes {
        let mut s: SecretBytes = SecretBytes::new(Vec::new());
        s.extend(seed);
        s
    }

    fn roundtrip_impl<SC, D>()
    where
        SC: StreamCipher + KeyIvInit + Send + 'static,
        D: Digest + Clone + Send + 'static,
    {
        let seed1 = s(b"hidden we are free");
        let seed2 = s(b"free to speak, to free ourselves");
        let seed3 = s(b"free to hide no more");

        let mut cc_out = OutboundClientCrypt::new();
        let mut cc_in = InboundClientCrypt::new();
        let pair = tor1::CryptStatePair::<SC, D>::construct(KGen::new(seed1.clone())).unwrap();
        add_layers(&mut cc_out, &mut cc_in, pair);
        let pair = tor1::CryptStatePair::<SC, D>::construct(KGen::new(seed2.clone())).unwrap();
        add_layers(&mut cc_out, &mut cc_in, pair);
        let pair = tor1::CryptStatePair::<SC, D>::construct(KGen::new(seed3.clone())).unwrap();
        add_layers(&mut cc_out, &mut cc_in, pair);

        let mut r1 = tor1::CryptStatePair::<SC, D>::construct(KGen::new(seed1)).unwrap();
        let mut r2 = tor1::CryptStatePair::<SC, D>::construct(KGen::new(seed2)).unwrap();
        let mut r3 = tor1::CryptStatePair::<SC, D>::construct(KGen::new(seed3)).unwrap();

        let mut rng = rand::thread_rng();
        for _ in 1..300 {
            // Outbound cell: only the last hop should recognize it.
            let mut cell = [0_u8; 509];
            let mut cell_orig = [0_u8; 509];
            rng.fill_bytes(&mut cell_orig[..]);
            cell.copy_from_slice(&cell_orig[..]);
            let mut cell = cell.into();
            let _tag = cc_out.encrypt(&mut cell, 2.into()).unwrap();
            assert_ne!(&cell.as_ref()[9..], &cell_orig.as_ref()[9..]);
            assert!(!r1.decrypt_outbound(&mut cell));
            assert!(!r2.decrypt_outbound(&mut cell));
            assert!(r3.decrypt_outbound(&mut cell));

            assert_eq!(&cell.as_ref()[9..], &cell_orig.as_ref()[9..]);

            // Inbound cell: peeling all three layers recovers the
            // plaintext and identifies the originating hop.
            let mut cell = [0_u8; 509];
            let mut cell_orig = [0_u8; 509];
            rng.fill_bytes(&mut cell_orig[..]);
            cell.copy_from_slice(&cell_orig[..]);
            let mut cell = cell.into();

            r3.originate(&mut cell);
            r3.encrypt_inbound(&mut cell);
            r2.encrypt_inbound(&mut cell);
            r1.encrypt_inbound(&mut cell);
            let (layer, _tag) = cc_in.decrypt(&mut cell).unwrap();
            assert_eq!(layer, 2.into());
            assert_eq!(&cell.as_ref()[9..], &cell_orig.as_ref()[9..]);
        }

        // Failure: sending a cell to a nonexistent hop.
        {
            let mut cell = [0_u8; 509].into();
            let err = cc_out.encrypt(&mut cell, 10.into());
            assert!(matches!(err, Err(Error::NoSuchHop)));
        }

        // Failure: a junk cell with no correct auth from any layer.
        {
            let mut cell = [0_u8; 509].into();
            let err = cc_in.decrypt(&mut cell);
            assert!(matches!(err, Err(Error::BadCellAuth)));
        }
    }

    #[test]
    fn roundtrip_tor1() {
        roundtrip_impl::<garlic_crypto::cipher::aes::Aes128Ctr, garlic_crypto::d::Sha1>();
    }

    #[test]
    fn roundtrip_hsv3() {
        roundtrip_impl::<garlic_crypto::cipher::aes::Aes256Ctr, garlic_crypto::d::Sha3_256>();
    }

    #[test]
    fn sequential_digests_differ() {
        let seed = s(b"chosen arbitrarily, like all of these");
        let pair = Tor1RelayCrypto::construct(KGen::new(seed)).unwrap();
        let mut cc_out = OutboundClientCrypt::new();
        let mut cc_in = InboundClientCrypt::new();
        add_layers(&mut cc_out, &mut cc_in, pair);

        let mut cell1: RelayCellBody = [1_u8; 509].into();
        let mut cell2: RelayCellBody = [1_u8; 509].into();
        let tag1 = cc_out.encrypt(&mut cell1, 0.into()).unwrap();
        let tag2 = cc_out.encrypt(&mut cell2, 0.into()).unwrap();
        // The running digest advances between identical cells.
        assert_ne!(tag1, tag2);
        assert_eq!(tag1.len(), 20);
    }

    // Known-answer test; the vectors were generated with an
    // independent implementation of the relay crypto.
    #[test]
    fn testvec() {
        use digest::{ExtendableOutput, Update, XofReader};

        const K1: &[u8; 72] =
            b"    'My public key is in this signed x509 object', said Tom assertively.";
        const K2: &[u8; 72] =
            b"'Let's chart the pedal phlanges in the tomb', said Tom cryptographically";
        const K3: &[u8; 72] =
            b"     'Segmentation fault bugs don't _just happen_', said Tom seethingly.";

        const SEED: &[u8;108] = b"'You mean to tell me that there's a version of Sha-3 with no limit on the output length?', said Tom shakily.";

        // These test vectors were generated from Tor.
        let data: &[(usize, &str)] = &include!("../../testdata/cell_crypt.data");

        let mut cc_out = OutboundClientCrypt::new();
        let mut cc_in = InboundClientCrypt::new();
        let pair = Tor1RelayCrypto::initialize(&K1[..]);
        add_layers(&mut cc_out, &mut cc_in, pair);
        let pair = Tor1RelayCrypto::initialize(&K2[..]);
        add_layers(&mut cc_out, &mut cc_in, pair);
        let pair = Tor1RelayCrypto::initialize(&K3[..]);
        add_layers(&mut cc_out, &mut cc_in, pair);

        let mut xof = garlic_crypto::d::Shake256::default();
        xof.update(&SEED[..]);
        let mut stream = xof.finalize_xof();

        let mut j = 0;
        for cellno in 0..51 {
            let mut body = [0_u8; 509];
            body[0] = 2; // command: data.
            body[4] = 1; // streamid: 1.
            body[9] = 1; // length: 498
            body[10] = 242;
            stream.read(&mut body[11..]);

            let mut cell = body.into();
            let _ = cc_out.encrypt(&mut cell, 2.into());

            if cellno == data[j].0 {
                let expected = hex::decode(data[j].1).unwrap();
                assert_eq!(cell.as_ref(), &expected[..]);
                j += 1;
            }
        }
    }
}
