//! Fetch and parse router descriptors.
//!
//! Routers parsed from the network status lack their ntor onion key;
//! this module fetches full server descriptors in batches by
//! fingerprint and extracts the handful of fields we care about.

use crate::consensus::base64_any;
use crate::{http, Error, Result};
use garlic_crypto::pk::ed25519::Ed25519Identity;
use garlic_crypto::pk::rsa::RsaIdentity;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::trace;

/// How long we give a directory relay to serve a descriptor batch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// The fields of a server descriptor that the client uses.
#[derive(Debug, Clone)]
pub(crate) struct RouterDesc {
    /// Fingerprint that ties the descriptor back to its consensus
    /// entry.
    pub(crate) fingerprint: RsaIdentity,
    /// The relay's ntor onion key.
    pub(crate) ntor_onion_key: [u8; 32],
    /// The relay's Ed25519 master identity, when present.
    pub(crate) ed_identity: Option<Ed25519Identity>,
}

/// Fetch the descriptors for `fingerprints` from the directory server
/// at `dir`.
pub(crate) async fn fetch_batch(
    dir: SocketAddr,
    fingerprints: &[RsaIdentity],
) -> Result<Vec<RouterDesc>> {
    let joined = fingerprints
        .iter()
        .map(|fp| hex::encode_upper(fp.as_bytes()))
        .collect::<Vec<_>>()
        .join("+");
    let path = format!("/tor/server/fp/{}.z", joined);
    let body = tokio::time::timeout(FETCH_TIMEOUT, http::dir_get(dir, &path))
        .await
        .map_err(|_| Error::Timeout)??;
    let text =
        String::from_utf8(body).map_err(|_| Error::ConsensusFormat("descriptor is not utf-8"))?;
    parse_descriptors(&text)
}

/// Parse a concatenated list of server descriptors.
///
/// A descriptor that is missing its ntor key or fingerprint is
/// skipped; an empty result is an error, since it means the directory
/// gave us nothing usable.
pub(crate) fn parse_descriptors(text: &str) -> Result<Vec<RouterDesc>> {
    /// Partially accumulated descriptor fields.
    #[derive(Default)]
    struct Partial {
        /// The "fingerprint" line, joined and decoded.
        fingerprint: Option<RsaIdentity>,
        /// The "ntor-onion-key" line.
        ntor: Option<[u8; 32]>,
        /// The "master-key-ed25519" line.
        ed: Option<Ed25519Identity>,
    }
    impl Partial {
        /// Convert into a RouterDesc if the required fields are here.
        fn build(self) -> Option<RouterDesc> {
            Some(RouterDesc {
                fingerprint: self.fingerprint?,
                ntor_onion_key: self.ntor?,
                ed_identity: self.ed,
            })
        }
    }

    let mut result = Vec::new();
    let mut current: Option<Partial> = None;
    for line in text.lines() {
        let mut words = line.split_ascii_whitespace();
        let Some(keyword) = words.next() else {
            continue;
        };
        let args: Vec<&str> = words.collect();
        match keyword {
            "router" => {
                if let Some(p) = current.take().and_then(Partial::build) {
                    result.push(p);
                }
                current = Some(Partial::default());
            }
            "fingerprint" => {
                if let Some(p) = current.as_mut() {
                    let hex_fp: String = args.concat();
                    p.fingerprint = RsaIdentity::from_hex(&hex_fp);
                }
            }
            "ntor-onion-key" => {
                if let (Some(p), Some(b64)) = (current.as_mut(), args.first()) {
                    p.ntor = base64_any(b64).and_then(|v| v.try_into().ok());
                }
            }
            "master-key-ed25519" => {
                if let (Some(p), Some(b64)) = (current.as_mut(), args.first()) {
                    p.ed = base64_any(b64)
                        .and_then(|v| <[u8; 32]>::try_from(v).ok())
                        .map(Ed25519Identity::new);
                }
            }
            _ => (),
        }
    }
    if let Some(p) = current.take().and_then(Partial::build) {
        result.push(p);
    }

    trace!("parsed {} router descriptors", result.len());
    if result.is_empty() {
        return Err(Error::ConsensusFormat("no descriptors in response"));
    }
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = "\
router ecstatic 198.51.100.7 9001 0 9030
master-key-ed25519 QkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkI
platform Tor 0.4.8.9 on Linux
fingerprint 4141 4141 4141 4141 4141 4141 4141 4141 4141 4141
ntor-onion-key mDTjdQ3qzd4XUMmIuAhmLdFHyyTPvSHLYLL0J2ZHmmc=
reject *:*
router keyless 203.0.113.5 443 0 0
fingerprint 4242 4242 4242 4242 4242 4242 4242 4242 4242 4242
reject *:*
";

    #[test]
    fn parse_sample() {
        let descs = parse_descriptors(SAMPLE).unwrap();
        // The second descriptor has no ntor key and is skipped.
        assert_eq!(descs.len(), 1);
        let d = &descs[0];
        assert_eq!(d.fingerprint.as_bytes(), &[0x41; 20]);
        assert!(d.ed_identity.is_some());
    }

    #[test]
    fn all_unusable_is_error() {
        assert!(parse_descriptors("router x 1.2.3.4 9001 0 0\n").is_err());
        assert!(parse_descriptors("").is_err());
    }
}
