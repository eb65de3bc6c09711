//! Implementations of Writeable and Readable for several items that
//! we use in the protocol.
//!
//! These don't need to be in a separate module, but for convenience
//! this is where we're putting them.

use super::*;

// ----------------------------------------------------------------------

/// Vec<u8> is the main type that implements Writer.
impl Writer for Vec<u8> {
    fn write_all(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
    fn write_u8(&mut self, byte: u8) {
        // specialize for performance
        self.push(byte);
    }
    fn write_zeros(&mut self, n: usize) {
        // specialize for performance
        let new_len = self.len() + n;
        self.resize(new_len, 0);
    }
}

impl Writer for bytes::BytesMut {
    fn write_all(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

// ----------------------------------------------------------------------

impl Writeable for [u8] {
    fn write_onto<B: Writer + ?Sized>(&self, b: &mut B) {
        b.write_all(self);
    }
}

impl Writeable for Vec<u8> {
    fn write_onto<B: Writer + ?Sized>(&self, b: &mut B) {
        b.write_all(&self[..]);
    }
}

impl<const N: usize> Writeable for [u8; N] {
    fn write_onto<B: Writer + ?Sized>(&self, b: &mut B) {
        b.write_all(&self[..]);
    }
}

impl<const N: usize> Readable for [u8; N] {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        let mut array = [0_u8; N];
        r.take_into(&mut array)?;
        Ok(array)
    }
}

/// Make Readable and Writeable implementations for a provided
/// unsigned type, delegating to the `take_uXX` and `write_uXX`
/// functions.
macro_rules! impl_u {
    ( $t:ty, $wrfn:ident, $rdfn:ident ) => {
        impl Writeable for $t {
            fn write_onto<B: Writer + ?Sized>(&self, b: &mut B) {
                b.$wrfn(*self)
            }
        }
        impl Readable for $t {
            fn take_from(b: &mut Reader<'_>) -> Result<Self> {
                b.$rdfn()
            }
        }
    };
}

impl_u!(u8, write_u8, take_u8);
impl_u!(u16, write_u16, take_u16);
impl_u!(u32, write_u32, take_u32);
impl_u!(u64, write_u64, take_u64);

// ----------------------------------------------------------------------

/// Implementations for std::net types.
mod net_impls {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    impl Writeable for Ipv4Addr {
        fn write_onto<B: Writer + ?Sized>(&self, b: &mut B) {
            b.write_all(&self.octets()[..]);
        }
    }

    impl Readable for Ipv4Addr {
        fn take_from(r: &mut Reader<'_>) -> Result<Self> {
            Ok(r.take_u32()?.into())
        }
    }

    impl Writeable for Ipv6Addr {
        fn write_onto<B: Writer + ?Sized>(&self, b: &mut B) {
            b.write_all(&self.octets()[..]);
        }
    }

    impl Readable for Ipv6Addr {
        fn take_from(r: &mut Reader<'_>) -> Result<Self> {
            let bytes: [u8; 16] = r.extract()?;
            Ok(bytes.into())
        }
    }
}

/// Implementations for the public-key types we use on the wire.
mod pk_impls {
    use super::*;

    impl Writeable for x25519_dalek::PublicKey {
        fn write_onto<B: Writer + ?Sized>(&self, b: &mut B) {
            b.write_all(self.as_bytes());
        }
    }

    impl Readable for x25519_dalek::PublicKey {
        fn take_from(r: &mut Reader<'_>) -> Result<Self> {
            let bytes: [u8; 32] = r.extract()?;
            Ok(bytes.into())
        }
    }

    impl Writeable for x25519_dalek::SharedSecret {
        fn write_onto<B: Writer + ?Sized>(&self, b: &mut B) {
            b.write_all(self.as_bytes());
        }
    }

    impl Writeable for ed25519_dalek::VerifyingKey {
        fn write_onto<B: Writer + ?Sized>(&self, b: &mut B) {
            b.write_all(self.as_bytes());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uint_roundtrip() {
        let mut w: Vec<u8> = Vec::new();
        w.write(&4_u16);
        w.write(&0x12345678_u32);
        w.write(&0xff_u8);
        let mut r = Reader::from_slice(&w[..]);
        assert_eq!(r.extract::<u16>().unwrap(), 4);
        assert_eq!(r.extract::<u32>().unwrap(), 0x12345678);
        assert_eq!(r.extract::<u8>().unwrap(), 0xff);
    }

    #[test]
    fn ip_encoding() {
        use std::net::Ipv4Addr;
        let mut w: Vec<u8> = Vec::new();
        w.write(&Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(w, &[0x7f, 0, 0, 1]);
        let mut r = Reader::from_slice(&w[..]);
        assert_eq!(
            r.extract::<Ipv4Addr>().unwrap(),
            Ipv4Addr::new(127, 0, 0, 1)
        );
    }

    #[test]
    fn array_roundtrip() {
        let mut w: Vec<u8> = Vec::new();
        w.write(&[9_u8; 7]);
        let mut r = Reader::from_slice(&w[..]);
        let a: [u8; 7] = r.extract().unwrap();
        assert_eq!(a, [9_u8; 7]);
        assert!(r.extract::<[u8; 2]>().is_err());
    }
}
