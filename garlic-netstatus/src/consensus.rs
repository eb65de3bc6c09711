//! Download and parse the network-status document.
//!
//! We fetch the current status ballot straight from a directory
//! authority over its HTTP dir port, and parse the line-oriented
//! grammar into [`NetworkStatus`].  Lines we don't use (versions,
//! protocols, policies) are skipped without error.

use crate::authority::Authority;
use crate::{http, Error, NetworkStatus, Result, Router};

use base64::Engine;
use garlic_crypto::pk::ed25519::Ed25519Identity;
use garlic_crypto::pk::rsa::RsaIdentity;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

/// The directory path for the current status document.
const STATUS_PATH: &str = "/tor/status-vote/current/authority.z";

/// How long we give a single authority to answer.
const AUTHORITY_TIMEOUT: Duration = Duration::from_secs(20);

/// Download and parse a network status, trying authorities in random
/// order until one of them answers with a parseable document.
pub(crate) async fn download(authorities: &[Authority]) -> Result<NetworkStatus> {
    let mut shuffled: Vec<&Authority> = authorities.iter().collect();
    shuffled.shuffle(&mut rand::thread_rng());

    let mut last_err: Option<Error> = None;
    for auth in shuffled {
        match try_one_authority(auth).await {
            Ok(status) => {
                info!(
                    "downloaded network status from {} ({} routers)",
                    auth.name,
                    status.routers.len()
                );
                return Ok(status);
            }
            Err(e) => {
                warn!("authority {} was unusable: {}", auth.name, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| Error::DirectoryUnavailable("no authorities configured".into())))
}

/// Fetch and parse the status document from a single authority.
async fn try_one_authority(auth: &Authority) -> Result<NetworkStatus> {
    let body = tokio::time::timeout(
        AUTHORITY_TIMEOUT,
        http::dir_get(auth.dir_addr, STATUS_PATH),
    )
    .await
    .map_err(|_| Error::Timeout)??;
    let text =
        String::from_utf8(body).map_err(|_| Error::ConsensusFormat("document is not utf-8"))?;
    parse(&text)
}

/// Parse a network-status document.
pub(crate) fn parse(text: &str) -> Result<NetworkStatus> {
    let mut status = NetworkStatus::default();
    let mut current: Option<Router> = None;

    for line in text.lines() {
        let mut words = line.split_ascii_whitespace();
        let Some(keyword) = words.next() else {
            continue;
        };
        let args: Vec<&str> = words.collect();

        match keyword {
            "r" => {
                if let Some(r) = current.take() {
                    status.routers.push(r);
                }
                current = Some(parse_r_line(&args)?);
            }
            "a" => {
                if let (Some(r), Some(addr)) = (current.as_mut(), args.first()) {
                    if let Ok(std::net::SocketAddr::V6(v6)) = addr.parse() {
                        r.ipv6 = Some((*v6.ip(), v6.port()));
                    }
                }
            }
            "s" => {
                if let Some(r) = current.as_mut() {
                    r.flags = args.iter().map(|s| s.to_string()).collect();
                }
            }
            "w" => {
                if let Some(r) = current.as_mut() {
                    r.bandwidth = parse_kv_u64(&args);
                }
            }
            "id" => {
                // "id ed25519 <base64>"
                if let (Some(r), ["ed25519", b64]) = (current.as_mut(), &args[..]) {
                    r.ed_identity = decode_b64_32(b64)
                        .map(Ed25519Identity::new);
                }
            }
            "valid-after" => status.valid_after = parse_datetime(&args)?,
            "fresh-until" => status.fresh_until = parse_datetime(&args)?,
            "valid-until" => status.valid_until = parse_datetime(&args)?,
            "shared-rand-current-value" => {
                status.shared_rand_current = parse_srv(&args);
            }
            "shared-rand-previous-value" => {
                status.shared_rand_previous = parse_srv(&args);
            }
            "params" => {
                status.params = args
                    .iter()
                    .filter_map(|kv| {
                        let (k, v) = kv.split_once('=')?;
                        Some((k.to_string(), v.parse().ok()?))
                    })
                    .collect();
            }
            // a/v/pr/p and the signature material don't affect us.
            _ => (),
        }
    }
    if let Some(r) = current.take() {
        status.routers.push(r);
    }

    if status.valid_after == 0 || status.fresh_until == 0 {
        return Err(Error::ConsensusFormat("missing document lifetime"));
    }
    if status.routers.is_empty() {
        return Err(Error::ConsensusFormat("no routers listed"));
    }
    dedup_fingerprints(&mut status.routers);
    Ok(status)
}

/// Parse one "r" line:
/// `r nickname identity digest date time address orport dirport`.
fn parse_r_line(args: &[&str]) -> Result<Router> {
    if args.len() < 8 {
        return Err(Error::ConsensusFormat("truncated r line"));
    }
    let nickname = args[0].to_string();
    let fingerprint = decode_b64_20(args[1])
        .map(RsaIdentity::new)
        .ok_or(Error::ConsensusFormat("bad identity on r line"))?;
    let addr = args[5]
        .parse()
        .map_err(|_| Error::ConsensusFormat("bad address on r line"))?;
    let or_port: u16 = args[6]
        .parse()
        .map_err(|_| Error::ConsensusFormat("bad orport on r line"))?;
    let dir_port: u16 = args[7].parse().unwrap_or(0);

    Ok(Router {
        nickname,
        addr,
        or_port,
        ipv6: None,
        dir_port,
        fingerprint,
        ed_identity: None,
        ntor_onion_key: None,
        flags: HashSet::new(),
        bandwidth: HashMap::new(),
        or_addrs: vec![SocketAddr::new(addr.into(), or_port)],
    })
}

/// Parse "Keyword=1234"-style arguments into a map.
fn parse_kv_u64(args: &[&str]) -> HashMap<String, u64> {
    args.iter()
        .filter_map(|kv| {
            let (k, v) = kv.split_once('=')?;
            Some((k.to_string(), v.parse().ok()?))
        })
        .collect()
}

/// Parse a "YYYY-MM-DD HH:MM:SS" pair of arguments into Unix seconds.
fn parse_datetime(args: &[&str]) -> Result<u64> {
    if args.len() < 2 {
        return Err(Error::ConsensusFormat("truncated time line"));
    }
    let joined = format!("{} {}", args[0], args[1]);
    let dt = chrono::NaiveDateTime::parse_from_str(&joined, "%Y-%m-%d %H:%M:%S")
        .map_err(|_| Error::ConsensusFormat("unparseable time"))?;
    Ok(dt.and_utc().timestamp() as u64)
}

/// Parse a shared-random line: `<NumReveals> <Value-base64>`.
fn parse_srv(args: &[&str]) -> Option<[u8; 32]> {
    decode_b64_32(args.get(1)?)
}

/// Decode a base64 value (with or without padding) into 32 bytes.
fn decode_b64_32(b64: &str) -> Option<[u8; 32]> {
    let bytes = base64_any(b64)?;
    bytes.try_into().ok()
}

/// Decode a base64 value (with or without padding) into 20 bytes.
fn decode_b64_20(b64: &str) -> Option<[u8; 20]> {
    let bytes = base64_any(b64)?;
    bytes.try_into().ok()
}

/// Decode base64 accepting both padded and unpadded forms, since
/// directory documents strip trailing `=` signs.
pub(crate) fn base64_any(b64: &str) -> Option<Vec<u8>> {
    let engine = base64::engine::general_purpose::GeneralPurpose::new(
        &base64::alphabet::STANDARD,
        base64::engine::general_purpose::GeneralPurposeConfig::new()
            .with_decode_padding_mode(base64::engine::DecodePaddingMode::Indifferent),
    );
    engine.decode(b64).ok()
}

/// Keep only the first listing for any fingerprint.
fn dedup_fingerprints(routers: &mut Vec<Router>) {
    let mut seen = HashSet::new();
    routers.retain(|r| seen.insert(r.fingerprint));
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = "\
network-status-version 3
vote-status vote
valid-after 2016-04-13 11:00:00
fresh-until 2016-04-13 12:00:00
valid-until 2016-04-13 14:00:00
params bwweightscale=10000 hsdir_spread_store=3 hsdir_n_replicas=2
shared-rand-previous-value 9 bmV4dCBzYXR1cmRheSBuaWdodCB3ZXJlIHNlbmRpbmc=
shared-rand-current-value 9 eW91Li4uLi4uLi4uIGJhY2sgdG8gdGhlIGZ1dHVyZSE=
r Carol QUFBQUFBQUFBQUFBQUFBQUFBQUE dGVzdA 2016-04-13 10:00:00 198.51.100.7 9001 9030
a [2001:db8::7]:9001
s Fast HSDir Running Valid
w Bandwidth=2000 Measured=1800
id ed25519 QkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkI
r Dave Q0NDQ0NDQ0NDQ0NDQ0NDQ0NDQ0M dGVzdA 2016-04-13 10:00:00 203.0.113.5 443 0
s Running Valid
w Bandwidth=50
";

    #[test]
    fn parse_sample() {
        let status = parse(SAMPLE).unwrap();
        assert_eq!(status.valid_after, 1_460_545_200);
        assert_eq!(status.fresh_until, 1_460_548_800);
        assert_eq!(status.routers.len(), 2);
        assert_eq!(status.params.get("hsdir_spread_store"), Some(&3));
        assert!(status.shared_rand_current.is_some());
        assert!(status.shared_rand_previous.is_some());

        let carol = &status.routers[0];
        assert_eq!(carol.nickname, "Carol");
        assert_eq!(carol.or_port, 9001);
        assert_eq!(carol.dir_port, 9030);
        assert!(carol.is_fast());
        assert!(carol.is_hsdir());
        assert_eq!(carol.weight(), 2000);
        assert_eq!(
            carol.ed_identity.unwrap().as_bytes(),
            &[b'B'; 32]
        );
        assert_eq!(carol.fingerprint.as_bytes(), &[b'A'; 20]);
        assert_eq!(
            carol.ipv6,
            Some(("2001:db8::7".parse().unwrap(), 9001))
        );

        let dave = &status.routers[1];
        assert!(!dave.is_fast());
        assert_eq!(dave.dir_port, 0);
        assert!(dave.dir_addr().is_none());
    }

    #[test]
    fn rejects_empty() {
        assert!(parse("").is_err());
        assert!(parse("valid-after 2016-04-13 11:00:00\n").is_err());
    }

    #[test]
    fn duplicate_fingerprints_keep_first() {
        let doubled = format!(
            "{}r Carol2 QUFBQUFBQUFBQUFBQUFBQUFBQUE dGVzdA 2016-04-13 10:00:00 198.51.100.9 9001 0\n",
            SAMPLE
        );
        let status = parse(&doubled).unwrap();
        assert_eq!(status.routers.len(), 2);
        assert_eq!(status.routers[0].nickname, "Carol");
    }
}
