//! Descriptions of relays as used to connect to and extend to them.
//!
//! When we tell one relay to connect to another (in an EXTEND2
//! message, or inside the encrypted part of an INTRODUCE1 message),
//! we describe the target relay as a list of "link specifiers".

use std::net::{IpAddr, SocketAddr};

use garlic_bytes::{Error, Readable, Reader, Result, Writeable, Writer};
use garlic_crypto::pk::curve25519;
use garlic_crypto::pk::ed25519::Ed25519Identity;
use garlic_crypto::pk::rsa::RsaIdentity;

/// A piece of information about a relay and how to connect to it.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSpec {
    /// The TCP address of an OR Port for a relay.
    OrPort(IpAddr, u16),
    /// The RSA identity fingerprint of the relay.
    RsaId(RsaIdentity),
    /// The Ed25519 identity of the relay.
    Ed25519Id(Ed25519Identity),
    /// A link specifier that we didn't recognize.
    Unrecognized(u8, Vec<u8>),
}

/// Indicates an IPv4 ORPORT link specifier.
const LSTYPE_ORPORT_V4: u8 = 0;
/// Indicates an IPv6 ORPORT link specifier.
const LSTYPE_ORPORT_V6: u8 = 1;
/// Indicates an RSA ID fingerprint link specifier.
const LSTYPE_RSAID: u8 = 2;
/// Indicates an Ed25519 link specifier.
const LSTYPE_ED25519ID: u8 = 3;

impl Readable for LinkSpec {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        /// Return the expected length for a given link specifier type.
        fn lstype_len(tp: u8) -> Option<usize> {
            match tp {
                LSTYPE_ORPORT_V4 => Some(6),
                LSTYPE_ORPORT_V6 => Some(18),
                LSTYPE_RSAID => Some(20),
                LSTYPE_ED25519ID => Some(32),
                _ => None,
            }
        }
        let lstype = r.take_u8()?;
        let lslen = r.take_u8()? as usize;
        if let Some(wantlen) = lstype_len(lstype) {
            if wantlen != lslen {
                return Err(Error::BadMessage("Wrong length for link specifier"));
            }
        }
        Ok(match lstype {
            LSTYPE_ORPORT_V4 => {
                let addr = IpAddr::V4(r.extract()?);
                LinkSpec::OrPort(addr, r.take_u16()?)
            }
            LSTYPE_ORPORT_V6 => {
                let addr = IpAddr::V6(r.extract()?);
                LinkSpec::OrPort(addr, r.take_u16()?)
            }
            LSTYPE_RSAID => LinkSpec::RsaId(r.extract()?),
            LSTYPE_ED25519ID => LinkSpec::Ed25519Id(r.extract()?),
            _ => LinkSpec::Unrecognized(lstype, r.take(lslen)?.into()),
        })
    }
}
impl Writeable for LinkSpec {
    fn write_onto<B: Writer + ?Sized>(&self, w: &mut B) {
        use LinkSpec::*;
        match self {
            OrPort(IpAddr::V4(v4), port) => {
                w.write_u8(LSTYPE_ORPORT_V4);
                w.write_u8(6); // Length
                w.write(v4);
                w.write_u16(*port);
            }
            OrPort(IpAddr::V6(v6), port) => {
                w.write_u8(LSTYPE_ORPORT_V6);
                w.write_u8(18); // Length
                w.write(v6);
                w.write_u16(*port);
            }
            RsaId(r) => {
                w.write_u8(LSTYPE_RSAID);
                w.write_u8(20); // Length
                w.write(r);
            }
            Ed25519Id(e) => {
                w.write_u8(LSTYPE_ED25519ID);
                w.write_u8(32); // Length
                w.write(e);
            }
            Unrecognized(tp, vec) => {
                w.write_u8(*tp);
                assert!(vec.len() < u8::MAX as usize);
                w.write_u8(vec.len() as u8);
                w.write_all(&vec[..]);
            }
        }
    }
}

impl From<&SocketAddr> for LinkSpec {
    fn from(sa: &SocketAddr) -> Self {
        LinkSpec::OrPort(sa.ip(), sa.port())
    }
}
impl From<RsaIdentity> for LinkSpec {
    fn from(id: RsaIdentity) -> Self {
        LinkSpec::RsaId(id)
    }
}
impl From<Ed25519Identity> for LinkSpec {
    fn from(id: Ed25519Identity) -> Self {
        LinkSpec::Ed25519Id(id)
    }
}

impl LinkSpec {
    /// Return the position in the list of identifiers at which a given
    /// linkspec should occur.
    pub(crate) fn sort_pos(&self) -> u8 {
        use LinkSpec::*;
        match self {
            OrPort(IpAddr::V4(_), _) => 0,
            RsaId(_) => 1,
            Ed25519Id(_) => 2,
            OrPort(IpAddr::V6(_), _) => 3,
            Unrecognized(n, _) => *n,
        }
    }
}

/// Information about a relay, sufficient to open a channel to it.
///
/// Anything that implements ChanTarget can be used as the target of a
/// direct TLS connection.
pub trait ChanTarget {
    /// Return the addresses at which you can connect to this relay.
    fn addrs(&self) -> &[SocketAddr];
    /// Return the ed25519 identity for this relay.
    fn ed_identity(&self) -> &Ed25519Identity;
    /// Return the RSA identity for this relay.
    fn rsa_identity(&self) -> &RsaIdentity;
}

/// Information about a relay, sufficient to extend a circuit to it.
pub trait CircTarget: ChanTarget {
    /// Return a new vector of link specifiers for this relay.
    fn linkspecs(&self) -> Vec<LinkSpec> {
        let mut result: Vec<LinkSpec> = vec![
            (*self.rsa_identity()).into(),
            (*self.ed_identity()).into(),
        ];
        for addr in self.addrs().iter() {
            result.push(addr.into());
        }
        result
    }
    /// Return the ntor onion key for this relay.
    fn ntor_onion_key(&self) -> &curve25519::PublicKey;
}

#[cfg(test)]
mod test {
    use super::*;
    use garlic_bytes::{Reader, Writer};
    use hex_literal::hex;

    #[test]
    fn linkspec_roundtrip() {
        let specs = vec![
            LinkSpec::OrPort("203.0.113.7".parse().unwrap(), 9001),
            LinkSpec::RsaId(RsaIdentity::new([17; 20])),
            LinkSpec::Ed25519Id(Ed25519Identity::new([42; 32])),
            LinkSpec::Unrecognized(77, vec![1, 2, 3]),
        ];
        let mut w: Vec<u8> = Vec::new();
        for ls in specs.iter() {
            w.write(ls);
        }
        let mut r = Reader::from_slice(&w[..]);
        let got: Vec<LinkSpec> = r.extract_n(specs.len()).unwrap();
        r.should_be_exhausted().unwrap();
        assert_eq!(got, specs);
    }

    #[test]
    fn orport_encoding() {
        let ls = LinkSpec::OrPort("127.0.0.1".parse().unwrap(), 443);
        let mut w: Vec<u8> = Vec::new();
        w.write(&ls);
        assert_eq!(&w[..], &hex!("00 06 7f000001 01bb")[..]);
    }

    #[test]
    fn bad_length_rejected() {
        // An RSAID link specifier must be exactly 20 bytes.
        let body = hex!("02 05 0102030405");
        let mut r = Reader::from_slice(&body[..]);
        assert!(r.extract::<LinkSpec>().is_err());
    }
}
