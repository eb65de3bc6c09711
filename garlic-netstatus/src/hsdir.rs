//! The onion-service directory ring.
//!
//! Every relay with the HSDir flag owns a position on a hash ring
//! that is recomputed each time period from the shared random value.
//! A service's descriptor is stored at `n_replicas` positions derived
//! from its blinded key; each replica is spread across
//! `spread_store` consecutive directories.

use crate::{Error, NetworkStatus, OnionAddress, Result, Router};
use garlic_crypto::hs::{ops, time as tp};
use garlic_crypto::pk::keymanip;
use std::collections::BTreeMap;
use tracing::debug;

/// Everything needed to fetch and decrypt one service's descriptor:
/// the responsible directories in fetch order, plus the derived key
/// material.
#[derive(Debug, Clone)]
pub struct HsDirsForService {
    /// The responsible directories, in the order they should be tried.
    /// May contain fewer than `n_replicas * spread_store` entries on
    /// tiny networks.
    pub hsdirs: Vec<Router>,
    /// The service's blinded public key for this time period.
    pub blinded_pk: [u8; 32],
    /// The subcredential tying the service to this time period.
    pub subcredential: [u8; 32],
}

/// Select the shared-random value to use when fetching descriptors
/// for the time period that contains `valid_after`.
///
/// If the SRV round in progress at `valid_after` started inside the
/// current time period, the network is still using the previous SRV;
/// otherwise the current one applies.  When the needed value is
/// absent from the document we fall back to the "disaster" SRV.
pub(crate) fn fetch_srv(status: &NetworkStatus) -> [u8; 32] {
    let interval = status.voting_interval();
    let period_length = status.time_period_length();

    let srv_start = tp::shared_random_start(status.valid_after, interval);
    let srv_period = tp::time_period_num(srv_start, interval, period_length);
    let next_boundary = tp::next_time_period_start(srv_period, interval, period_length);

    let chosen = if status.valid_after >= srv_start && status.valid_after < next_boundary {
        status.shared_rand_previous
    } else {
        status.shared_rand_current
    };
    chosen.unwrap_or_else(|| {
        ops::disaster_shared_random(period_length, tp::time_period_num(
            status.valid_after,
            interval,
            period_length,
        ))
    })
}

/// Compute the ring of HSDir routers for the current period, ordered
/// by directory index.
fn build_ring(status: &NetworkStatus, srv: &[u8; 32]) -> BTreeMap<[u8; 32], usize> {
    let period_length = status.time_period_length();
    let period_num = status.time_period_num();
    status
        .routers
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_hsdir())
        .filter_map(|(i, r)| {
            let id = r.ed_identity?;
            let idx = ops::build_directory_index(id.as_bytes(), srv, period_length, period_num);
            Some((idx, i))
        })
        .collect()
}

/// Return the HSDirs responsible for `onion` this time period, in the
/// order a client should try them, together with the blinded key and
/// subcredential.
pub(crate) fn responsible_hsdirs(
    status: &NetworkStatus,
    onion: &OnionAddress,
) -> Result<HsDirsForService> {
    let period_length = status.time_period_length();
    let period_num = status.time_period_num();

    let blinded_pk = keymanip::blind_pubkey(onion.public_key(), period_length, period_num)
        .map_err(|_| Error::InvalidOnionAddress)?;
    let subcredential = ops::subcredential(onion.public_key().as_bytes(), &blinded_pk);

    let srv = fetch_srv(status);
    let ring = build_ring(status, &srv);
    if ring.is_empty() {
        return Err(Error::IntroductionPointsUnavailable);
    }

    let spread = status.hsdir_spread_store() as usize;
    let mut chosen: Vec<usize> = Vec::new();
    for replica in 1..=status.hsdir_n_replicas() {
        let start = ops::build_index(&blinded_pk, replica, period_length, period_num);
        // Walk the ring from `start`, wrapping around once.
        let walk = ring
            .range(start..)
            .chain(ring.range(..start))
            .map(|(_, i)| *i);
        let mut taken = 0_usize;
        for router_idx in walk {
            if taken >= spread {
                break;
            }
            taken += 1;
            if !chosen.contains(&router_idx) {
                chosen.push(router_idx);
            }
        }
    }

    debug!(
        "{}: {} responsible hsdirs this period",
        onion.domain(),
        chosen.len()
    );
    // Clients spread their load by trying the candidates in a random
    // order.
    let mut hsdirs: Vec<Router> = chosen
        .into_iter()
        .map(|i| status.routers[i].clone())
        .collect();
    use rand::seq::SliceRandom;
    hsdirs.shuffle(&mut rand::thread_rng());
    Ok(HsDirsForService {
        hsdirs,
        blinded_pk,
        subcredential,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::fake_router;

    /// A network status with both SRVs set and a deterministic set of
    /// HSDir routers.
    fn status_with_hsdirs(n: usize) -> NetworkStatus {
        let mut status = NetworkStatus {
            valid_after: 499_176_000,               // 1985-10-26T12:00:00Z
            fresh_until: 499_176_000 + 3600,
            valid_until: 499_176_000 + 3 * 3600,
            shared_rand_current: Some([0x43; 32]),
            shared_rand_previous: Some([0x44; 32]),
            ..NetworkStatus::default()
        };
        for i in 0..n {
            let mut r = fake_router("h", [10, 1, (i / 256) as u8, (i % 256) as u8], &["HSDir"]);
            r.nickname = format!("hsdir{}", i);
            r.fingerprint = garlic_crypto::pk::rsa::RsaIdentity::new([i as u8; 20]);
            r.ed_identity = Some(garlic_crypto::pk::ed25519::Ed25519Identity::new([i as u8; 32]));
            status.routers.push(r);
        }
        status
    }

    fn ddg() -> OnionAddress {
        "duckduckgogg42xjoc72x3sjasowoarfbgcmvfimaftt6twagswzczad.onion"
            .parse()
            .unwrap()
    }

    #[test]
    fn srv_selection_rule() {
        // At 12:00 the SRV round began at 00:00, which belongs to the
        // previous time period: the boundary at 12:00 has just passed,
        // so the current SRV applies.
        let noon = status_with_hsdirs(1);
        assert_eq!(fetch_srv(&noon), [0x43; 32]);

        // At 00:00 the SRV round begins exactly then, inside the
        // still-running time period: keep the previous SRV.
        let mut midnight = status_with_hsdirs(1);
        midnight.valid_after = 499_219_200; // 1985-10-27T00:00:00Z
        midnight.fresh_until = midnight.valid_after + 3600;
        assert_eq!(fetch_srv(&midnight), [0x44; 32]);
    }

    #[test]
    fn srv_disaster_fallback() {
        let mut status = status_with_hsdirs(1);
        status.shared_rand_current = None;
        status.shared_rand_previous = None;
        let srv = fetch_srv(&status);
        assert_eq!(
            srv,
            ops::disaster_shared_random(
                status.time_period_length(),
                status.time_period_num()
            )
        );
    }

    #[test]
    fn coverage_spans_replicas() {
        let status = status_with_hsdirs(40);
        let got = responsible_hsdirs(&status, &ddg()).unwrap();
        // Up to n_replicas (2) * spread_store (4) directories; fewer
        // only when the two replica ranges overlap on the ring.
        assert!(got.hsdirs.len() >= 4 && got.hsdirs.len() <= 8);
        let mut fps: Vec<_> = got.hsdirs.iter().map(|r| r.fingerprint).collect();
        fps.sort();
        fps.dedup();
        assert_eq!(fps.len(), got.hsdirs.len());
    }

    #[test]
    fn wraps_when_ring_is_small() {
        let status = status_with_hsdirs(3);
        let got = responsible_hsdirs(&status, &ddg()).unwrap();
        // Every directory is responsible when the ring is tiny.
        assert_eq!(got.hsdirs.len(), 3);
    }

    #[test]
    fn no_hsdirs_is_an_error() {
        let mut status = status_with_hsdirs(3);
        for r in status.routers.iter_mut() {
            r.flags.clear();
        }
        assert!(matches!(
            responsible_hsdirs(&status, &ddg()),
            Err(Error::IntroductionPointsUnavailable)
        ));
    }
}
