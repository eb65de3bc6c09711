//! Constant-time helpers.

use subtle::ConstantTimeEq;

/// Try to compare the contents of two byte slices in a way that
/// resists timing attacks.
///
/// If the two slices have different lengths, the comparison cannot be
/// constant-time, but the answer is still correct.
pub fn bytes_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn eq() {
        assert!(bytes_eq(&b"123"[..], &b"1234"[..3]));
        assert!(!bytes_eq(&b"123"[..], &b"1234"[..]));
        assert!(!bytes_eq(&b"abc"[..], &b"abd"[..]));
        assert!(bytes_eq(&b""[..], &b""[..]));
    }
}
